//! Photon viewer
//!
//! Path traces a scene directory progressively, accumulating one sample
//! per pixel each frame.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p photon-viewer -- [SCENE_DIR] [OPTIONS]
//! ```
//!
//! ## Controls
//!
//! - `W`/`A`/`S`/`D`: move
//! - Left mouse drag: look around
//! - `Esc`: quit
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod camera;
mod runner;

use crate::runner::{run, ViewerConfig};

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let mut config = ViewerConfig::new("Photon Viewer");
    for arg in &args {
        match arg.as_str() {
            "--validation" => config = config.with_validation(true),
            flag if flag.starts_with('-') => {
                anyhow::bail!("Unknown option {flag}, see --help");
            }
            dir => config = config.with_scene_dir(dir),
        }
    }

    run(config)
}

fn print_help() {
    eprintln!(
        "Photon path tracing viewer

USAGE:
    cargo run -p photon-viewer -- [SCENE_DIR] [OPTIONS]

ARGS:
    SCENE_DIR               Directory containing scene.json
                            Default: scenes/cornell-box

OPTIONS:
    --validation            Enable Vulkan validation layers
    -h, --help              Print this help message

CONTROLS:
    W/A/S/D                 Move
    Left mouse drag         Look around
    Esc                     Quit

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
