//! Solar System - deferred PBR demo
//!
//! Usage:
//!   solar-system [--config <file>] [--assets <dir>] [--fullscreen] [run]
//!   solar-system render --output frame.png [--width W] [--height H]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solar_system::{render_command, SolarApp, SolarConfig};
use std::path::PathBuf;
use winit::event_loop::{ControlFlow, EventLoop};

#[derive(Parser)]
#[command(name = "solar-system")]
#[command(about = "Deferred PBR solar system with image-based lighting and bloom", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML scene configuration (defaults to ./solar-system.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory that model and environment paths are relative to
    #[arg(long, global = true)]
    assets: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive window (default)
    Run {
        /// Launch in fullscreen mode
        #[arg(long)]
        fullscreen: bool,

        /// Window width
        #[arg(long)]
        width: Option<u32>,

        /// Window height
        #[arg(long)]
        height: Option<u32>,
    },

    /// Render one frame offscreen to a PNG
    Render {
        /// Output image path
        #[arg(short, long, default_value = "solar-system.png")]
        output: PathBuf,

        /// Image width
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Image height
        #[arg(long, default_value = "720")]
        height: u32,

        /// Tone mapping operator (none, exposure, reinhard, ...)
        #[arg(long)]
        tone_mapping: Option<String>,

        /// Exposure for the exposure operator
        #[arg(long)]
        exposure: Option<f32>,
    },
}

fn load_config(cli: &Cli) -> Result<SolarConfig> {
    let mut config = SolarConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(assets) = &cli.assets {
        config.asset_root = assets.clone();
    }
    if let Some(Commands::Run {
        fullscreen,
        width,
        height,
    }) = &cli.command
    {
        config.window.fullscreen |= *fullscreen;
        if let Some(width) = width {
            config.window.width = *width;
        }
        if let Some(height) = height {
            config.window.height = *height;
        }
    }
    config.validate()?;
    Ok(config)
}

fn run_window(config: SolarConfig) -> Result<()> {
    log::info!("Controls:");
    log::info!("  WASD       - Move");
    log::info!("  Q / E      - Up / down");
    log::info!("  Right drag - Look");
    log::info!("  Wheel, +/- - Zoom");
    log::info!("  F          - Toggle fullscreen");
    log::info!("  F1         - Toggle settings");
    log::info!("  Escape     - Exit");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = SolarApp::new(config);
    event_loop.run_app(&mut app)?;

    match app.take_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        None | Some(Commands::Run { .. }) => run_window(config),
        Some(Commands::Render {
            output,
            width,
            height,
            tone_mapping,
            exposure,
        }) => render_command::run(
            &config,
            render_command::RenderArgs {
                output,
                width,
                height,
                tone_mapping,
                exposure,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["solar-system"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn run_overrides_window() {
        let cli = Cli::try_parse_from([
            "solar-system",
            "--assets",
            "/tmp/assets",
            "run",
            "--fullscreen",
            "--width",
            "800",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert!(config.window.fullscreen);
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.asset_root, PathBuf::from("/tmp/assets"));
    }

    #[test]
    fn zero_width_is_rejected() {
        let cli = Cli::try_parse_from(["solar-system", "run", "--width", "0"]).unwrap();
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn render_defaults() {
        let cli = Cli::try_parse_from(["solar-system", "render"]).unwrap();
        match cli.command {
            Some(Commands::Render {
                output, width, height, ..
            }) => {
                assert_eq!(output, PathBuf::from("solar-system.png"));
                assert_eq!((width, height), (1280, 720));
            }
            _ => panic!("expected render"),
        }
    }
}
