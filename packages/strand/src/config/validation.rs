//! Configuration validation.

use super::ClientConfig;
use crate::error::{Error, Result};

impl ClientConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if:
    /// - the host is empty or the port is zero
    /// - the framing token is empty, or does not fit under `max_buffer`
    /// - the write queue bound is zero
    /// - the jitter factor is outside `0.0..=1.0`
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::InvalidConfig("host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig("port cannot be zero".into()));
        }
        if let Some(framing) = &self.framing {
            if framing.token.is_empty() {
                return Err(Error::InvalidConfig("framing token cannot be empty".into()));
            }
            if framing.max_buffer <= framing.token.len() {
                return Err(Error::InvalidConfig(format!(
                    "framing max_buffer ({}) must exceed the token length ({})",
                    framing.max_buffer,
                    framing.token.len()
                )));
            }
        }
        if self.max_queued_requests == 0 {
            return Err(Error::InvalidConfig(
                "max_queued_requests cannot be zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(Error::InvalidConfig(format!(
                "jitter_factor {} is outside 0.0..=1.0",
                self.reconnect.jitter_factor
            )));
        }
        Ok(())
    }
}
