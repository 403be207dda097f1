//! Engine orchestration: the two deployment variants sharing one
//! codebase.

mod base_station;
mod robot;

pub use base_station::{BaseEngine, BaseTickSummary};
pub use robot::{parse_artifact_gt, RobotEngine, TickSummary};

use crate::error::Result;
use crate::state::{CommandResponse, CommandResult, EngineCommand};

/// Either deployment variant, as held by the ingest thread.
pub enum Engine {
    /// A robot building its own graph.
    Robot(Box<RobotEngine>),
    /// The base station fusing everyone's graphs.
    Base(Box<BaseEngine>),
}

impl Engine {
    /// One ingest tick.
    pub fn tick(&mut self) -> Result<()> {
        match self {
            Engine::Robot(e) => e.tick().map(|_| ()),
            Engine::Base(e) => e.tick().map(|_| ()),
        }
    }

    /// Read access to the underlying graph.
    pub fn graph(&self) -> &crate::graph::PoseGraph {
        match self {
            Engine::Robot(e) => e.graph(),
            Engine::Base(e) => e.graph(),
        }
    }

    /// Execute a control-surface command between ticks.
    pub fn handle_command(&mut self, command: &EngineCommand) -> CommandResult {
        match command {
            EngineCommand::Freeze => {
                // The publisher snapshots the map on its next cycle.
                log::info!("freezing map for the visualizer");
                Ok(CommandResponse::Frozen)
            }
            EngineCommand::ArtifactGt => match self {
                Engine::Base(e) => e
                    .process_artifact_gt()
                    .map(|_| CommandResponse::ArtifactGtApplied)
                    .map_err(|e| e.to_string()),
                Engine::Robot(_) => {
                    Err("artifact ground truth is a base-station command".to_string())
                }
            },
            EngineCommand::Save { path } => {
                let path = path
                    .clone()
                    .unwrap_or_else(|| std::path::PathBuf::from("saved_pose_graph.zip"));
                let result = match self {
                    Engine::Robot(e) => e.save(&path),
                    Engine::Base(e) => e.save(&path),
                };
                result
                    .map(|_| CommandResponse::Saved(path))
                    .map_err(|e| e.to_string())
            }
            EngineCommand::Load { path } => {
                let path = path
                    .clone()
                    .unwrap_or_else(|| std::path::PathBuf::from("saved_pose_graph.zip"));
                let result = match self {
                    Engine::Robot(e) => e.load(&path),
                    Engine::Base(e) => e.load(&path),
                };
                result
                    .map(|_| CommandResponse::Loaded(path))
                    .map_err(|e| e.to_string())
            }
            EngineCommand::BatchLoopClosure => match self {
                Engine::Robot(e) => e
                    .batch_loop_closure()
                    .map(CommandResponse::BatchFinished)
                    .map_err(|e| e.to_string()),
                Engine::Base(_) => {
                    Err("batch loop closure runs on the robot".to_string())
                }
            },
            EngineCommand::RemoveFactor { key1, key2 } => match self {
                Engine::Robot(e) => e
                    .remove_factor(*key1, *key2)
                    .map(|_| CommandResponse::FactorRemoved)
                    .map_err(|e| e.to_string()),
                Engine::Base(_) => Err("factor removal runs on the robot".to_string()),
            },
        }
    }
}
