mod audio;
mod cli;
mod config;
mod error;
mod logging;
mod models;

use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use clap::Parser;
use log::{info, log, warn};

use audio::{AudioBackend, CpalBackend, EngineComponents, EngineSettings, PlaybackRegistry};
use cli::{CliApp, Commands, StatusDisplay};
use config::ConfigManager;
use error::PlayerError;
use models::{PlaybackEvent, PlaybackOutcome};

/// How long shutdown waits for engines to release their resources
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Runs one CLI command against the persisted configuration
pub struct AppController {
    config_manager: ConfigManager,
}

impl AppController {
    pub fn new() -> Result<Self, PlayerError> {
        let config_manager = ConfigManager::new()?;
        info!("Using configuration at {}", config_manager.config_path().display());
        Ok(Self { config_manager })
    }

    pub async fn execute_command(&mut self, command: Commands) -> Result<(), PlayerError> {
        match command {
            Commands::Play { path, id } => {
                let path = path.map(|p| cli::expand_path(&p.to_string_lossy()));
                self.play(&id, path).await
            }
            Commands::Devices => {
                let backend = CpalBackend::new(self.config_manager.get_config().output.clone());
                let routes = backend
                    .enumerate_outputs()
                    .map_err(|e| PlayerError::Playback(e.into()))?;
                StatusDisplay::display_routes(&routes);
                Ok(())
            }
            Commands::Info { path } => {
                let path = cli::expand_path(&path.to_string_lossy());
                let tracks = audio::probe_tracks(&path).map_err(|e| PlayerError::Playback(e.into()))?;
                let duration = audio::probe_duration(&path).map_err(|e| PlayerError::Playback(e.into()))?;
                StatusDisplay::display_track_info(&path, &tracks, duration);
                Ok(())
            }
            Commands::Enable => {
                self.config_manager.set_enabled(true)?;
                println!("Call audio playback enabled");
                Ok(())
            }
            Commands::Disable => {
                self.config_manager.set_enabled(false)?;
                println!("Call audio playback disabled");
                Ok(())
            }
            Commands::SetFile { path } => {
                let path = path.map(|p| cli::expand_path(&p.to_string_lossy()));
                if let Some(path) = &path {
                    if !path.is_file() {
                        return Err(PlayerError::File(std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            path.display().to_string(),
                        )));
                    }
                }
                self.config_manager.set_audio_file(path.clone())?;
                match path {
                    Some(path) => println!("Default audio file set to {}", path.display()),
                    None => println!("Default audio file cleared"),
                }
                Ok(())
            }
            Commands::Config => {
                StatusDisplay::display_config(self.config_manager.get_config(), self.config_manager.config_path());
                Ok(())
            }
        }
    }

    /// Play on the telephony route and wait for the outcome. Ctrl-C stops playback.
    async fn play(&self, sound_id: &str, path: Option<PathBuf>) -> Result<(), PlayerError> {
        let config = self.config_manager.get_config();
        if !config.enabled {
            return Err(PlayerError::Disabled);
        }

        let (registry, events) = PlaybackRegistry::new(
            EngineComponents::system(config),
            EngineSettings::from_config(config),
        );
        let engine_id = registry.play(sound_id, path)?;
        println!("▶ Playing '{}' (Ctrl-C to stop)", sound_id);

        let mut waiter = tokio::task::spawn_blocking(move || wait_for_engine(events, engine_id));

        let event = tokio::select! {
            result = &mut waiter => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping playback");
                registry.stop_all();
                waiter.await
            }
        };

        if !registry.wait_idle(SHUTDOWN_TIMEOUT) {
            warn!("Playback did not shut down within {}s", SHUTDOWN_TIMEOUT.as_secs());
        }

        match event {
            Ok(Some(event)) => {
                println!("{}", StatusDisplay::format_outcome(&event));
                match event.outcome {
                    PlaybackOutcome::Failed(reason) => Err(PlayerError::PlaybackFailed(reason)),
                    _ => Ok(()),
                }
            }
            Ok(None) => Err(PlayerError::PlaybackFailed("playback ended without an outcome".to_string())),
            Err(e) => Err(PlayerError::PlaybackFailed(e.to_string())),
        }
    }
}

/// Block until the engine with `engine_id` reports, skipping events from other engines
fn wait_for_engine(events: Receiver<PlaybackEvent>, engine_id: u64) -> Option<PlaybackEvent> {
    loop {
        match events.recv() {
            Ok(event) if event.engine_id == engine_id => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

fn report_error(error: &PlayerError) {
    log!(error.severity().log_level(), "{}", error);
    StatusDisplay::display_error(error);
}

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init_with_default("warn") {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let cli = CliApp::parse();

    let mut app = match AppController::new() {
        Ok(app) => app,
        Err(e) => {
            report_error(&e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.execute_command(cli.command).await {
        report_error(&e);
        std::process::exit(1);
    }
}
