//! Recorder Client - mirrors calls, radio legs and briefings to ED-137 voice
//! recorders
//!
//! For every recordable entity (a phone call, a radio transmit or receive
//! leg, a briefing or a group feed) the client keeps a protocol session per
//! configured recording channel, pushes an XML call record describing the
//! entity and forwards the entity's captured audio while it is recording.
//!
//! - One actor per entity with a bounded mailbox and ordered processing
//! - Concurrent per-channel fan-out with isolated channel failures
//! - Debouncing of hold and radio-off flicker
//! - Two-phase configuration reload that drains live entities first
//!
//! # Example
//!
//! ```rust,no_run
//! use recorder_client::{
//!     config::{ConfigPaths, RuntimeSettings},
//!     protocol::{CallState, RecorderKind},
//!     registry::Registry,
//!     session::LoggingConnector,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let topology = ConfigPaths::default().load().await.unwrap_or_default();
//!     let registry = Registry::new(
//!         topology,
//!         Arc::new(LoggingConnector),
//!         RuntimeSettings::default(),
//!     );
//!
//!     // Field 0 is the VCS user, field 7 the calling number
//!     registry.on_call_state("op1", RecorderKind::Phone, CallState::Incoming, "pos1,1001", "0,7", 40000);
//!     registry.on_call_state("op1", RecorderKind::Phone, CallState::Confirmed, "", "", 40000);
//!
//!     registry.stop_all_calls().await;
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod command;
pub mod config;
pub mod crd;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod session;

// Re-export commonly used types for convenience
pub use actor::{ActorStats, EntityActor};
pub use config::{ConfigPaths, RuntimeSettings, Topology};
pub use protocol::{EntityKey, Event, EventKind, RecorderKind};
pub use registry::{Registry, ReloadState};
pub use session::{Connector, LoggingConnector, MemoryConnector, Session, SessionState};

use session::{SessionError, TransportError};
use thiserror::Error;

/// Errors that can occur in the recorder client
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Configuration could not be used
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Recorder transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Recorder address does not form a valid URL
    #[error("Invalid recorder URL: {0}")]
    InvalidUrl(String),

    /// Captured datagram is not a usable RTP packet
    #[error("Invalid packet: {0}")]
    Packet(String),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<SessionError> for RecorderError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Transport(e) => RecorderError::Transport(e),
            SessionError::InvalidUrl(url) => RecorderError::InvalidUrl(url),
            SessionError::NotConnected => RecorderError::Transport(TransportError::Closed),
        }
    }
}

/// Result type alias for recorder client operations
pub type Result<T> = std::result::Result<T, RecorderError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Random tokens used in call records
pub mod utils {
    use rand::Rng;

    /// Fresh connection reference: `xxxxxxxx-xxxx-xxxx-xxxxxxxx` in hex
    pub fn random_conref() -> String {
        let mut rng = rand::thread_rng();
        format!(
            "{:08x}-{:04x}-{:04x}-{:08x}",
            rng.gen::<u32>(),
            rng.gen::<u16>(),
            rng.gen::<u16>(),
            rng.gen::<u32>()
        )
    }

    /// Four decimal digits, zero padded
    pub fn random_4_digits() -> String {
        format!("{:04}", rand::thread_rng().gen_range(0..10_000))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "recorder-client");
    }

    #[test]
    fn test_random_conref_shape() {
        let conref = random_conref();
        let parts: Vec<&str> = conref.split('-').collect();
        assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![8, 4, 4, 8]);
        assert!(conref.chars().all(|c| c == '-' || c.is_ascii_hexdigit()));
        assert_ne!(random_conref(), conref);
    }

    #[test]
    fn test_random_4_digits() {
        for _ in 0..100 {
            let token = random_4_digits();
            assert_eq!(token.len(), 4);
            assert!(token.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_session_error_conversion() {
        let err: RecorderError = SessionError::InvalidUrl("bad".to_string()).into();
        assert!(matches!(err, RecorderError::InvalidUrl(url) if url == "bad"));
        let err: RecorderError = SessionError::NotConnected.into();
        assert!(matches!(err, RecorderError::Transport(TransportError::Closed)));
    }
}
