//! Shared state and inter-thread command plumbing.

mod commands;
mod shared;

pub use commands::{
    create_command_channel, parse_command, send_command_sync, CommandReceiver, CommandResponse,
    CommandResult, CommandSender, CommandWithResponse, EngineCommand,
};
pub use shared::{
    create_map_cloud, create_shared_state, try_update_map, EngineStatus, MapCloudHandle,
    SharedState, SharedStateHandle,
};
