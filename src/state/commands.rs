//! Command channel between the control surface and the ingest thread.
//!
//! Commands arrive as text (`freeze`, `artifact_gt`, `save [path]`,
//! `load [path]`) and are parsed into typed requests. Each carries a
//! response channel so the sender can wait for acknowledgment.

use std::path::PathBuf;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::core::types::Key;

/// Commands handled by the ingest thread between ticks.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Freeze the current map for the visualizer.
    Freeze,
    /// Attach configured ground-truth priors to known artifacts.
    ArtifactGt,
    /// Save the pose graph bundle.
    Save {
        /// Bundle path; the configured default when absent.
        path: Option<PathBuf>,
    },
    /// Load a pose graph bundle, replacing the current graph.
    Load {
        /// Bundle path; the configured default when absent.
        path: Option<PathBuf>,
    },
    /// Sweep every keyed scan for loop closures.
    BatchLoopClosure,
    /// Remove the factor connecting two keys.
    RemoveFactor {
        /// First endpoint.
        key1: Key,
        /// Second endpoint.
        key2: Key,
    },
}

/// Result of executing a command.
pub type CommandResult = Result<CommandResponse, String>;

/// Acknowledgment payloads.
#[derive(Debug, Clone)]
pub enum CommandResponse {
    /// Map frozen.
    Frozen,
    /// Ground-truth priors attached.
    ArtifactGtApplied,
    /// Bundle written.
    Saved(PathBuf),
    /// Bundle loaded.
    Loaded(PathBuf),
    /// Batch sweep finished; whether any closure was found.
    BatchFinished(bool),
    /// Factor removed.
    FactorRemoved,
}

/// A command paired with its response channel.
#[derive(Debug)]
pub struct CommandWithResponse {
    /// The request.
    pub command: EngineCommand,
    /// Where to send the acknowledgment.
    pub response_tx: Sender<CommandResult>,
}

/// Sender end held by the control surface.
pub type CommandSender = Sender<CommandWithResponse>;

/// Receiver end held by the ingest thread.
pub type CommandReceiver = Receiver<CommandWithResponse>;

/// Create the command channel pair.
pub fn create_command_channel() -> (CommandSender, CommandReceiver) {
    unbounded()
}

/// Send a command and wait for its acknowledgment.
pub fn send_command_sync(
    sender: &CommandSender,
    command: EngineCommand,
    timeout_ms: u64,
) -> CommandResult {
    let (response_tx, response_rx) = bounded(1);
    sender
        .send(CommandWithResponse {
            command,
            response_tx,
        })
        .map_err(|_| "ingest thread not running (channel closed)".to_string())?;
    response_rx
        .recv_timeout(std::time::Duration::from_millis(timeout_ms))
        .map_err(|e| format!("command not acknowledged: {}", e))?
}

/// Parse a text command from the control channel.
pub fn parse_command(text: &str) -> Option<EngineCommand> {
    let mut tokens = text.split_whitespace();
    match tokens.next()? {
        "freeze" => Some(EngineCommand::Freeze),
        "artifact_gt" => Some(EngineCommand::ArtifactGt),
        "save" => Some(EngineCommand::Save {
            path: tokens.next().map(PathBuf::from),
        }),
        "load" => Some(EngineCommand::Load {
            path: tokens.next().map(PathBuf::from),
        }),
        "batch_loop_closure" => Some(EngineCommand::BatchLoopClosure),
        _ => None,
    }
}
