use std::fmt;
use std::time::Duration;

/// Format of the selected input track, captured once before decoding starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub codec: String,
}

impl TrackFormat {
    pub fn new(sample_rate: u32, channels: u16, codec: impl Into<String>) -> Self {
        Self {
            sample_rate,
            channels,
            codec: codec.into(),
        }
    }

    /// Get a human-readable format description
    pub fn format_description(&self) -> String {
        format!(
            "{} - {} Hz - {} channel{}",
            self.codec,
            self.sample_rate,
            self.channels,
            if self.channels == 1 { "" } else { "s" }
        )
    }
}

/// Output format reported by a decoder session before its first PCM frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz/{} ch", self.sample_rate, self.channels)
    }
}

/// Channel layouts the output sink can play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    /// Map a decoder channel count onto a sink layout. Anything above two channels is rejected.
    pub fn from_channel_count(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }

    pub fn channels(&self) -> u16 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelLayout::Mono => "Mono",
            ChannelLayout::Stereo => "Stereo",
        }
    }
}

/// Negotiated PCM16 stream format for the output sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
}

impl StreamFormat {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn channels(&self) -> u16 {
        self.layout.channels()
    }

    /// Bytes per interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.channels() as usize * Self::BYTES_PER_SAMPLE
    }

    /// Bytes needed to hold the given duration of audio
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as u128 * duration.as_millis() / 1000) as usize;
        frames * self.frame_bytes()
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PCM16 {} Hz {}", self.sample_rate, self.layout.name())
    }
}

/// One demuxed, still-compressed access unit
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedUnit {
    pub track_id: u32,
    pub timestamp: u64,
    pub duration: u64,
    pub data: Box<[u8]>,
    pub end_of_stream: bool,
}

impl EncodedUnit {
    pub fn new(track_id: u32, timestamp: u64, duration: u64, data: Box<[u8]>) -> Self {
        Self {
            track_id,
            timestamp,
            duration,
            data,
            end_of_stream: false,
        }
    }

    /// The marker a source yields once after its last unit
    pub fn end_of_stream(track_id: u32) -> Self {
        Self {
            track_id,
            timestamp: 0,
            duration: 0,
            data: Box::new([]),
            end_of_stream: true,
        }
    }
}

/// Interleaved 16-bit PCM produced by a decoder session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PcmFrame {
    pub samples: Vec<i16>,
    pub end_of_stream: bool,
}

impl PcmFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            end_of_stream: false,
        }
    }

    pub fn end_of_stream(samples: Vec<i16>) -> Self {
        Self {
            samples,
            end_of_stream: true,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.samples.len() * StreamFormat::BYTES_PER_SAMPLE
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Kinds of output endpoints relevant to call playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Telephony,
    Other,
}

/// One hardware output endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRoute {
    pub id: String,
    pub name: String,
    pub kind: RouteKind,
}

impl OutputRoute {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: RouteKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn is_telephony(&self) -> bool {
        self.kind == RouteKind::Telephony
    }
}

/// How an engine run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Failure,
    Cancelled,
}

/// Lifecycle of one playback engine. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Draining,
    Terminated(Termination),
}

impl EngineState {
    fn rank(&self) -> u8 {
        match self {
            EngineState::Idle => 0,
            EngineState::Running => 1,
            EngineState::Draining => 2,
            EngineState::Terminated(_) => 3,
        }
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(&self, next: EngineState) -> bool {
        next.rank() > self.rank()
    }
}

/// Terminal result delivered exactly once per engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl PlaybackOutcome {
    pub fn termination(&self) -> Termination {
        match self {
            PlaybackOutcome::Completed => Termination::Success,
            PlaybackOutcome::Cancelled => Termination::Cancelled,
            PlaybackOutcome::Failed(_) => Termination::Failure,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PlaybackOutcome::Failed(_))
    }
}

/// Message an engine sends when it terminates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEvent {
    pub sound_id: String,
    pub engine_id: u64,
    pub outcome: PlaybackOutcome,
}

/// Format a playback length as `mm:ss`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}", total / 60, total % 60)
}
