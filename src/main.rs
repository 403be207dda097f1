//! SLAM node entry point.
//!
//! Runs either deployment variant and exposes the text command channel
//! on stdin (`freeze`, `artifact_gt`, `save [path]`, `load [path]`).

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use crossbeam_channel::unbounded;

use sangha_slam::engine::{BaseEngine, Engine, RobotEngine};
use sangha_slam::state::{
    create_command_channel, create_map_cloud, create_shared_state, parse_command,
    send_command_sync,
};
use sangha_slam::threads::{IngestThread, PublisherOutputs, PublisherThread};
use sangha_slam::SlamConfig;

#[derive(Parser, Debug)]
#[command(name = "sangha_slam_node", about = "Multi-robot pose-graph SLAM back-end")]
struct Args {
    /// Configuration file (YAML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Force base-station mode regardless of configuration.
    #[arg(long)]
    base: bool,

    /// Publish rate for graph/map/odometry topics (Hz).
    #[arg(long, default_value_t = 2.0)]
    publish_rate: f64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match SlamConfig::from_yaml_file(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("failed to load config {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => SlamConfig::default(),
    };
    if args.base {
        config.deployment.b_is_basestation = true;
    }

    let engine = if config.deployment.b_is_basestation {
        log::info!("starting as base station");
        Engine::Base(Box::new(BaseEngine::new(config.clone())))
    } else {
        log::info!("starting as robot '{}'", config.deployment.robot_prefix);
        match RobotEngine::new(config.clone()) {
            Ok(e) => Engine::Robot(Box::new(e)),
            Err(e) => {
                log::error!("failed to initialize engine: {}", e);
                std::process::exit(1);
            }
        }
    };

    let shared = create_shared_state();
    let map = create_map_cloud();
    let running = Arc::new(AtomicBool::new(true));
    let (_sensor_tx, sensor_rx) = unbounded();
    let (command_tx, command_rx) = create_command_channel();
    let (graph_tx, _graph_rx) = unbounded();
    let (scan_tx, _scan_rx) = unbounded();
    let (map_tx, _map_rx) = unbounded();
    let (odom_tx, _odom_rx) = unbounded();

    let ingest = IngestThread::spawn(
        engine,
        shared.clone(),
        map.clone(),
        sensor_rx,
        command_rx,
        running.clone(),
        config.deployment.update_rate,
    );
    let publisher = PublisherThread::spawn(
        shared,
        map,
        PublisherOutputs {
            graph_tx,
            scan_tx,
            map_tx,
            odom_tx,
        },
        running.clone(),
        args.publish_rate,
    );

    // Text command channel on stdin; EOF shuts the node down.
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        match parse_command(&line) {
            Some(command) => match send_command_sync(&command_tx, command, 10_000) {
                Ok(response) => log::info!("command ok: {:?}", response),
                Err(e) => log::error!("command failed: {}", e),
            },
            None if line.trim().is_empty() => {}
            None => log::warn!("unrecognized command: {:?}", line),
        }
    }

    running.store(false, Ordering::Relaxed);
    let _ = ingest.join();
    let _ = publisher.join();
}
