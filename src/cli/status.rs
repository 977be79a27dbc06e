use std::path::Path;
use std::time::Duration;

use crate::config::PlayerConfig;
use crate::error::{ErrorSeverity, PlayerError};
use crate::models::{format_duration, OutputRoute, PlaybackEvent, PlaybackOutcome, TrackFormat};

/// Console formatting for CLI output
pub struct StatusDisplay;

impl StatusDisplay {
    /// List output routes, marking the first telephony route as the one playback will use
    pub fn display_routes(routes: &[OutputRoute]) {
        println!("┌─ Output Devices ────────────────────────────────────────┐");
        if routes.is_empty() {
            println!("│ No output devices found");
        }
        for line in Self::route_lines(routes) {
            println!("│ {}", line);
        }
        println!("└─────────────────────────────────────────────────────────┘");
    }

    fn route_lines(routes: &[OutputRoute]) -> Vec<String> {
        let selected = routes.iter().position(OutputRoute::is_telephony);
        routes
            .iter()
            .enumerate()
            .map(|(index, route)| {
                let marker = if Some(index) == selected {
                    "▶"
                } else if route.is_telephony() {
                    "•"
                } else {
                    " "
                };
                let kind = if route.is_telephony() { " (telephony)" } else { "" };
                format!("{} {}{}", marker, Self::truncate(&route.name, 40), kind)
            })
            .collect()
    }

    /// Show the audio tracks found in a file
    pub fn display_track_info(path: &Path, tracks: &[TrackFormat], duration: Option<Duration>) {
        println!("┌─ Track Information ─────────────────────────────────────┐");
        println!("│ Path: {}", Self::truncate(&path.display().to_string(), 50));
        println!("│ Duration: {}", Self::duration_label(duration));
        if tracks.is_empty() {
            println!("│ No audio tracks");
        }
        for (index, track) in tracks.iter().enumerate() {
            println!(
                "│ Track {}: {} ({})",
                index + 1,
                track.format_description(),
                Self::channel_description(track.channels)
            );
            if track.channels > 2 {
                println!("│   Not playable: calls accept mono or stereo only");
            }
        }
        println!("└─────────────────────────────────────────────────────────┘");
    }

    fn duration_label(duration: Option<Duration>) -> String {
        duration.map(format_duration).unwrap_or_else(|| "--:--".to_string())
    }

    pub fn display_config(config: &PlayerConfig, path: &Path) {
        println!("# {}", path.display());
        match toml::to_string_pretty(config) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to render configuration: {}", e),
        }
    }

    /// One-line summary of how a playback ended
    pub fn format_outcome(event: &PlaybackEvent) -> String {
        match &event.outcome {
            PlaybackOutcome::Completed => format!("✓ Finished playing '{}'", event.sound_id),
            PlaybackOutcome::Cancelled => format!("⏹ Stopped '{}'", event.sound_id),
            PlaybackOutcome::Failed(reason) => format!("✗ '{}' failed: {}", event.sound_id, reason),
        }
    }

    /// Display error message with formatting
    pub fn display_error(error: &PlayerError) {
        let severity = error.severity();
        let severity_icon = match severity {
            ErrorSeverity::Info => "ℹ",
            ErrorSeverity::Warning => "⚠",
            ErrorSeverity::Error => "✗",
            ErrorSeverity::Critical => "🔥",
        };

        eprintln!("┌─ {} {} ─────────────────────────────────────────────────┐",
            severity_icon, severity.as_str());
        for line in Self::wrap_text(&error.user_message(), 55) {
            eprintln!("│ {}", line);
        }
        if let Some(hint) = Self::hint(error) {
            eprintln!("│");
            eprintln!("│ {}", hint);
        }
        eprintln!("└─────────────────────────────────────────────────────────┘");
    }

    fn hint(error: &PlayerError) -> Option<&'static str> {
        use crate::error::{PlaybackError, SinkError};

        match error {
            PlayerError::Playback(PlaybackError::Sink(SinkError::NoTelephonyOutput)) => {
                Some("Use 'echocast devices' and set output.telephony_device")
            }
            PlayerError::Playback(PlaybackError::NoInputSelected) => {
                Some("Pass a file or run 'echocast set-file <path>'")
            }
            PlayerError::Config(_) => Some("Configuration will use default values"),
            _ => None,
        }
    }

    /// Wrap text to fit within specified width
    fn wrap_text(text: &str, width: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current_line = String::new();

        for word in text.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.len() + word.len() + 1 <= width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(current_line);
                current_line = word.to_string();
            }
        }
        if !current_line.is_empty() {
            lines.push(current_line);
        }
        lines
    }

    /// Get channel description from channel count
    pub fn channel_description(channels: u16) -> &'static str {
        match channels {
            1 => "Mono",
            2 => "Stereo",
            6 => "5.1 Surround",
            8 => "7.1 Surround",
            _ => "Multi-channel",
        }
    }

    /// Truncate string to fit display width
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len || max_len <= 3 {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{}...", kept)
        }
    }
}
