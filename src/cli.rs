//! Minimal control surface over the engine facade: `send`, `list`, `cancel`.
//!
//! Always compiled (not feature-gated) — it's test/integration scaffolding
//! for the scenario tests in `tests/`, not a product UI.

use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::Result;
use crate::protocol::types::{PeerId, Priority};
use crate::transfer::{TransferId, TransferStatus};

/// One parsed CLI command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send { path: PathBuf, peer_id: PeerId },
    List,
    Cancel { transfer_id: String },
}

impl Command {
    pub fn parse(args: &[&str]) -> Result<Self> {
        match args {
            ["send", path, peer] => Ok(Command::Send {
                path: PathBuf::from(path),
                peer_id: PeerId::from_hex(peer)?,
            }),
            ["list"] => Ok(Command::List),
            ["cancel", id] => Ok(Command::Cancel { transfer_id: id.to_string() }),
            _ => Err(crate::error::Error::InvalidState(format!("unrecognized command: {args:?}"))),
        }
    }
}

/// Executes a parsed [`Command`] against a running [`Engine`], returning a
/// human-readable result line.
pub async fn execute(engine: &Arc<Engine>, command: Command) -> Result<String> {
    match command {
        Command::Send { path, peer_id } => {
            let transfer_id = engine.queue_send(&path, peer_id, Priority::Normal).await?;
            Ok(format!("queued {transfer_id}"))
        }
        Command::List => {
            let peers = engine
                .peers()
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            Ok(format!("peers: {peers}"))
        }
        Command::Cancel { transfer_id } => {
            let uuid = uuid::Uuid::parse_str(&transfer_id)
                .map_err(|e| crate::error::Error::InvalidState(format!("invalid transfer id: {e}")))?;
            let transfer_id = TransferId::from(crate::protocol::FileId(uuid));
            engine.cancel(&transfer_id);
            Ok(format!("cancelled {transfer_id}"))
        }
    }
}

pub fn status_label(status: &TransferStatus) -> &'static str {
    match status {
        TransferStatus::Queued => "queued",
        TransferStatus::Preparing => "preparing",
        TransferStatus::Transferring => "transferring",
        TransferStatus::Paused { .. } => "paused",
        TransferStatus::Completed => "completed",
        TransferStatus::Cancelled => "cancelled",
        TransferStatus::Failed { .. } => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_command() {
        let cmd = Command::parse(&["send", "/tmp/file.bin", "0123456789ab"]).unwrap();
        assert!(matches!(cmd, Command::Send { .. }));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Command::parse(&["frobnicate"]).is_err());
    }
}
