use thiserror::Error;

/// Main application error type
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Playback is disabled")]
    Disabled,

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),
}

impl PlayerError {
    /// Get user-friendly error message with suggested solutions
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Playback(err) => err.to_string(),
            PlayerError::File(err) => Self::format_file_error(err),
            PlayerError::Config(err) => err.user_message(),
            PlayerError::Disabled => {
                "Call audio playback is disabled - run 'echocast enable' first".to_string()
            }
            PlayerError::PlaybackFailed(reason) => reason.clone(),
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlayerError::Playback(err) => match err.category() {
                ErrorCategory::Configuration => ErrorSeverity::Error,
                ErrorCategory::Negotiation => ErrorSeverity::Warning,
                ErrorCategory::Io => ErrorSeverity::Critical,
            },
            PlayerError::File(_) => ErrorSeverity::Error,
            PlayerError::Config(_) => ErrorSeverity::Warning,
            PlayerError::Disabled => ErrorSeverity::Info,
            PlayerError::PlaybackFailed(_) => ErrorSeverity::Error,
        }
    }

    fn format_file_error(err: &std::io::Error) -> String {
        match err.kind() {
            std::io::ErrorKind::NotFound => "File or directory not found".to_string(),
            std::io::ErrorKind::PermissionDenied => "Permission denied - cannot access file".to_string(),
            _ => format!("File system error: {}", err),
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Broad classes of fatal playback conditions.
///
/// Decoder back-pressure never shows up here; it is handled inside the transfer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing telephony output, no input selected, route binding not confirmed
    Configuration,
    /// Unsupported stream format, no decodable track
    Negotiation,
    /// Read, write or device state failures
    Io,
}

/// Any fatal condition that terminates one playback attempt
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("No input file was selected")]
    NoInputSelected,

    #[error("Decoder produced audio before reporting its output format")]
    FrameBeforeFormat,

    #[error("Decoder output format changed mid-stream: {from} -> {to}")]
    FormatRenegotiated { from: String, to: String },

    #[error("Playback thread panicked: {0}")]
    Panicked(String),

    #[error("Failed to start playback thread: {0}")]
    ThreadSpawn(String),
}

impl PlaybackError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlaybackError::Source(err) => err.category(),
            PlaybackError::Decode(err) => err.category(),
            PlaybackError::Sink(err) => err.category(),
            PlaybackError::NoInputSelected => ErrorCategory::Configuration,
            PlaybackError::FrameBeforeFormat | PlaybackError::FormatRenegotiated { .. } => {
                ErrorCategory::Negotiation
            }
            PlaybackError::Panicked(_) | PlaybackError::ThreadSpawn(_) => ErrorCategory::Io,
        }
    }
}

/// Errors raised while opening or demuxing the input resource
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Audio file not found: {path}")]
    NotFound { path: String },

    #[error("Unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("Input file contains no audio track")]
    NoAudioTrack,

    #[error("No decoders could handle the input file")]
    NoDecoderAvailable,

    #[error("Unknown track id: {0}")]
    UnknownTrack(u32),

    #[error("Failed to read from input file: {0}")]
    ReadFailed(String),

    #[error("Input stream already reached its end")]
    Exhausted,

    #[error("Input file has already been released")]
    Released,
}

impl SourceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SourceError::NotFound { .. } => ErrorCategory::Configuration,
            SourceError::UnsupportedContainer(_)
            | SourceError::NoAudioTrack
            | SourceError::NoDecoderAvailable
            | SourceError::UnknownTrack(_) => ErrorCategory::Negotiation,
            SourceError::ReadFailed(_) | SourceError::Exhausted | SourceError::Released => {
                ErrorCategory::Io
            }
        }
    }
}

/// Decoder session errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("No decoder available for codec: {codec}")]
    Unsupported { codec: String },

    #[error("Failed to configure decoder: {0}")]
    Configuration(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Decoder session is not running")]
    NotStarted,

    #[error("Decoder session closed unexpectedly")]
    SessionClosed,
}

impl DecodeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DecodeError::Unsupported { .. } | DecodeError::Configuration(_) => {
                ErrorCategory::Negotiation
            }
            DecodeError::DecodeFailed(_) | DecodeError::NotStarted | DecodeError::SessionClosed => {
                ErrorCategory::Io
            }
        }
    }
}

/// Output sink and device errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("No telephony output audio device found")]
    NoTelephonyOutput,

    #[error("Failed to enumerate output devices: {0}")]
    Enumeration(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Failure when querying minimum buffer size: {0}")]
    MinBufferQuery(String),

    #[error("Output device is busy: {0}")]
    DeviceBusy(String),

    #[error("Failed to set preferred output device: {0}")]
    RouteBindFailed(String),

    #[error("Output stream is in a bad state: {0}")]
    BadDeviceState(String),

    #[error("Failed to write to output stream: {0}")]
    WriteError(String),
}

impl SinkError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SinkError::NoTelephonyOutput | SinkError::RouteBindFailed(_) => {
                ErrorCategory::Configuration
            }
            SinkError::UnsupportedFormat(_) | SinkError::MinBufferQuery(_) => {
                ErrorCategory::Negotiation
            }
            SinkError::Enumeration(_)
            | SinkError::DeviceBusy(_)
            | SinkError::BadDeviceState(_)
            | SinkError::WriteError(_) => ErrorCategory::Io,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save configuration settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
        }
    }
}
