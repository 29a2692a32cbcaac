//! A bounded pool of connections sharing one configuration, with
//! round-robin and least-load selection.
//!
//! Members are independent sockets; every pool-wide operation is plain
//! iteration with no cross-member coordination. Selection reads each
//! member's lock-free state and queue aggregates.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

use crate::aio::WriteHandle;
use crate::config::ClientConfig;
use crate::connection::{Client, Event, EventKind};
use crate::error::{Error, Result};

/// How [`ClientPool::select`] picks a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectPolicy {
    /// Advance a shared cursor, one full lap at most.
    RoundRobin,
    /// The connected member with the fewest queued outbound bytes
    /// (tie-break: fewest bytes ever queued).
    LeastLoaded,
}

/// A fixed set of connections built from one configuration.
pub struct ClientPool {
    members: Vec<Client>,
    cursor: AtomicUsize,
}

impl ClientPool {
    /// Build `count` connections eagerly, assigning pool indices `0..count`.
    pub fn new(config: ClientConfig, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(Error::InvalidConfig("pool size cannot be zero".into()));
        }
        config.validate()?;
        let members = (0..count)
            .map(|index| Client::with_pool_index(config.clone(), Some(index)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            members,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// All members, in pool-index order.
    #[must_use]
    pub fn members(&self) -> &[Client] {
        &self.members
    }

    /// Pick a member under `policy`. With `connected_only`, members that
    /// are not currently connected are skipped; `None` when a full pass
    /// yields nothing eligible.
    #[must_use]
    pub fn select(&self, policy: SelectPolicy, connected_only: bool) -> Option<&Client> {
        match policy {
            SelectPolicy::RoundRobin => self.select_round_robin(connected_only),
            SelectPolicy::LeastLoaded => self.select_least_loaded(),
        }
    }

    fn select_round_robin(&self, connected_only: bool) -> Option<&Client> {
        let len = self.members.len();
        for _ in 0..len {
            let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let member = &self.members[slot];
            if !connected_only || member.is_connected() {
                return Some(member);
            }
        }
        None
    }

    fn select_least_loaded(&self) -> Option<&Client> {
        self.members
            .iter()
            .filter(|m| m.is_connected())
            .min_by_key(|m| (m.queued_bytes(), m.total_bytes_ever_queued()))
    }

    /// Queue `data` on the member `policy` selects.
    pub fn write_via(&self, policy: SelectPolicy, data: impl Into<Bytes>) -> Result<WriteHandle> {
        match self.select(policy, true) {
            Some(member) => member.write(data),
            None => Err(Error::Closed),
        }
    }

    /// Start a connect cycle on every member.
    pub fn connect_all(&self) -> Result<()> {
        self.for_each(Client::connect)
    }

    /// Disconnect every member.
    pub fn disconnect_all(&self) -> Result<()> {
        self.for_each(Client::disconnect)
    }

    /// Reconnect every member.
    pub fn reconnect_all(&self) -> Result<()> {
        self.for_each(Client::reconnect)
    }

    /// Destroy every member.
    pub fn destroy_all(&self) -> Result<()> {
        self.for_each(Client::destroy)
    }

    fn for_each(&self, op: impl Fn(&Client) -> Result<()>) -> Result<()> {
        for member in &self.members {
            op(member)?;
        }
        Ok(())
    }

    /// Register an event handler on every member. The factory is invoked
    /// once per member with its pool index.
    pub fn set_event_all<F, H>(&self, kind: EventKind, factory: F) -> Result<()>
    where
        F: Fn(usize) -> H,
        H: FnMut(Event) + Send + 'static,
    {
        for (index, member) in self.members.iter().enumerate() {
            member.on(kind, factory(index))?;
        }
        Ok(())
    }

    /// Remove the handler for `kind` on every member.
    pub fn clear_event_all(&self, kind: EventKind) -> Result<()> {
        for member in &self.members {
            member.clear(kind)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("members", &self.members.len())
            .finish()
    }
}
