pub mod buffer;
pub mod decoder;
pub mod device;
pub mod engine;
pub mod registry;
pub mod sink;
pub mod source;

#[cfg(test)]
pub mod tests;

// Re-export the pipeline seams
pub use decoder::{
    DecoderFactory, DecoderHandle, DecoderOutput, DecoderSession, PollWait, SubmitStatus,
    SymphoniaDecoderFactory,
};
pub use sink::{find_telephony_route, open_sink, AudioBackend, PlayState, SinkHandle, SinkStream};
pub use source::{
    probe_duration, probe_tracks, select_audio_track, MediaOpener, MediaSource, SourceHandle,
    SymphoniaOpener, TrackDescriptor,
};

// Re-export the cpal output backend
pub use buffer::PcmBuffer;
pub use device::{CpalBackend, CpalSinkStream};

// Re-export engine and registry
pub use engine::{EngineComponents, EngineSettings, PlaybackEngine};
pub use registry::PlaybackRegistry;
