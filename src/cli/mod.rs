use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod status;
pub use status::StatusDisplay;

/// Sound id used when `play` is not given one
pub const DEFAULT_SOUND_ID: &str = "default";

/// Plays an audio file into the telephony output of an active call
#[derive(Parser)]
#[command(name = "echocast")]
#[command(about = "Plays an audio file into the telephony output route of an active call")]
#[command(version = "0.1.0")]
pub struct CliApp {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand, PartialEq)]
pub enum Commands {
    /// Play a file (or the configured default) on the telephony output and wait until it ends
    Play {
        /// Audio file to play; falls back to the configured file
        path: Option<PathBuf>,
        /// Sound id; playing an id that is already playing restarts it
        #[arg(long, default_value = DEFAULT_SOUND_ID)]
        id: String,
    },
    /// List output devices and mark the telephony route
    Devices,
    /// Show the audio tracks and duration of a file
    Info {
        path: PathBuf,
    },
    /// Allow call audio playback
    Enable,
    /// Disallow call audio playback
    Disable,
    /// Set the default audio file, or clear it when no path is given
    SetFile {
        path: Option<PathBuf>,
    },
    /// Print the current configuration
    Config,
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }
    PathBuf::from(path)
}
