//! Solar system demo built on solar-render
//!
//! Loads the scene described by [`SolarConfig`], then either opens an
//! interactive window ([`SolarApp`]) or renders a single frame to a PNG
//! ([`render_command`]).

pub mod app;
pub mod clock;
pub mod config;
pub mod input;
pub mod render_command;
pub mod setup;
pub mod ui;

pub use app::SolarApp;
pub use clock::FrameClock;
pub use config::{ConfigError, SolarConfig, DEFAULT_CONFIG_FILE};
pub use input::InputState;
pub use ui::{SettingsAction, SettingsPanel};
