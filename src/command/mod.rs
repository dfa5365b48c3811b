//! Line-oriented JSON commands for driving the registry without the
//! signaling layer.
//!
//! ```text
//! {"command":"radio","name":"A1","kind":"radio_tx","state":"tx_on","values":"pos1","ids":"0","port":40000}
//! {"command":"stop_all"}
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ConfigPaths;
use crate::protocol::{BriefState, CallState, GroupState, MediaState, RadioButtonState, RecorderKind};
use crate::registry::Registry;
use crate::Result;

/// One state notification as the signaling layer reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification<S> {
    #[serde(default)]
    pub name: String,
    pub kind: RecorderKind,
    pub state: S,
    /// Comma-delimited field values
    #[serde(default)]
    pub values: String,
    /// Comma-delimited field ids, parallel to `values`
    #[serde(default)]
    pub ids: String,
    /// Local audio listen port, 0 if unchanged
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Brief(Notification<BriefState>),
    Group(Notification<GroupState>),
    Radio(Notification<RadioButtonState>),
    Call(Notification<CallState>),
    Media(Notification<MediaState>),
    Reload,
    StopAll,
    Stats,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Run a command against the registry. `Stats` returns the actor
/// statistics as JSON.
pub async fn dispatch(
    registry: &Arc<Registry>,
    paths: &ConfigPaths,
    command: Command,
) -> Result<Option<String>> {
    match command {
        Command::Brief(n) => {
            registry.on_brief_state(&n.name, n.kind, n.state, &n.values, &n.ids, n.port)
        }
        Command::Group(n) => {
            registry.on_group_state(&n.name, n.kind, n.state, &n.values, &n.ids, n.port)
        }
        Command::Radio(n) => {
            registry.on_radio_state(&n.name, n.kind, n.state, &n.values, &n.ids, n.port)
        }
        Command::Call(n) => {
            registry.on_call_state(&n.name, n.kind, n.state, &n.values, &n.ids, n.port)
        }
        Command::Media(n) => {
            registry.on_call_media_state(&n.name, n.kind, n.state, &n.values, &n.ids, n.port)
        }
        Command::Reload => {
            if !registry.reload(paths).await {
                warn!("Reload finished with entities still live");
            }
        }
        Command::StopAll => {
            if registry.stop_all_calls().await {
                info!("All entities stopped");
            } else {
                warn!("Stop-all finished with entities still live");
            }
        }
        Command::Stats => return Ok(Some(serde_json::to_string(&registry.stats())?)),
    }
    Ok(None)
}
