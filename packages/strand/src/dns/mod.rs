//! Hostname resolution via the [hickory-resolver](https://github.com/hickory-dns/hickory-dns)
//! crate, plus the address ring used to balance reconnects across a DNS
//! answer.

use std::net::IpAddr;
use std::sync::OnceLock;

use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;

use crate::error::{Error, Result};

/// Lazily constructed resolver shared by every connection in the process.
static RESOLVER: OnceLock<TokioResolver> = OnceLock::new();

fn resolver() -> &'static TokioResolver {
    RESOLVER.get_or_init(|| {
        TokioResolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .build()
    })
}

/// Resolve `host` to its address list. A literal IP bypasses the lookup.
pub async fn resolve(host: &str) -> Result<Vec<IpAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let lookup = resolver()
        .lookup_ip(host)
        .await
        .map_err(|e| Error::Dns(e.to_string()))?;
    let addrs: Vec<IpAddr> = lookup.iter().collect();
    if addrs.is_empty() {
        return Err(Error::Dns(format!("no addresses for {host}")));
    }
    tracing::debug!(host, count = addrs.len(), "resolved");
    Ok(addrs)
}

/// The last DNS answer's addresses with a rotation cursor.
///
/// The ring only re-resolves when empty; reconnects after failure advance
/// the cursor when the balancing policy asks for it.
#[derive(Debug, Default, Clone)]
pub struct AddrRing {
    addrs: Vec<IpAddr>,
    cursor: usize,
}

impl AddrRing {
    /// Replace the ring's contents with a fresh answer.
    pub fn fill(&mut self, addrs: Vec<IpAddr>) {
        self.addrs = addrs;
        self.cursor = 0;
    }

    /// The address the next connect attempt should use.
    #[must_use]
    pub fn current(&self) -> Option<IpAddr> {
        self.addrs.get(self.cursor).copied()
    }

    /// Rotate to the next address, wrapping at the end.
    pub fn advance(&mut self) {
        if !self.addrs.is_empty() {
            self.cursor = (self.cursor + 1) % self.addrs.len();
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Drop the cached answer so the next connect re-resolves.
    pub fn clear(&mut self) {
        self.addrs.clear();
        self.cursor = 0;
    }
}
