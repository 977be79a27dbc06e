use std::ops::{Deref, DerefMut};
use std::time::Duration;
use log::{debug, info, warn};
use crate::error::SinkError;
use crate::logging::OperationTimer;
use crate::models::{ChannelLayout, OutputRoute, PcmFrame, StreamFormat, StreamInfo};

/// Playback state reported by an output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Paused,
    Playing,
}

/// Host audio system that can enumerate outputs and open PCM16 streams on them
pub trait AudioBackend: Send + Sync {
    fn enumerate_outputs(&self) -> Result<Vec<OutputRoute>, SinkError>;

    /// Smallest buffer in bytes the route accepts for `format`
    fn min_buffer_bytes(&self, format: &StreamFormat, route: &OutputRoute) -> Result<usize, SinkError>;

    /// Create a stream that is not yet bound to any route
    fn open_stream(
        &self,
        format: StreamFormat,
        route: &OutputRoute,
        buffer_bytes: usize,
    ) -> Result<Box<dyn SinkStream>, SinkError>;
}

/// One open PCM16 output stream.
///
/// `stop` and `release` must be safe to call more than once.
pub trait SinkStream {
    fn format(&self) -> StreamFormat;

    /// Bind the stream to `route`. `Ok(false)` means the host did not confirm the binding.
    fn bind_route(&mut self, route: &OutputRoute) -> Result<bool, SinkError>;

    fn start(&mut self) -> Result<(), SinkError>;

    fn play_state(&self) -> PlayState;

    /// Blocking write. Returns the number of bytes accepted.
    fn write(&mut self, frame: &PcmFrame) -> Result<usize, SinkError>;

    /// Block until queued audio has been played out
    fn drain(&mut self) -> Result<(), SinkError>;

    fn stop(&mut self) -> Result<(), SinkError>;

    fn release(&mut self);
}

/// Pick the first output route classified as telephony
pub fn find_telephony_route(backend: &dyn AudioBackend) -> Result<OutputRoute, SinkError> {
    let routes = backend.enumerate_outputs()?;
    debug!("Found {} output route(s)", routes.len());

    routes
        .into_iter()
        .find(OutputRoute::is_telephony)
        .ok_or(SinkError::NoTelephonyOutput)
}

/// Open, bind and start a stream on `route` for the decoder's negotiated format
pub fn open_sink(
    backend: &dyn AudioBackend,
    info: StreamInfo,
    route: &OutputRoute,
    buffer_multiplier: usize,
) -> Result<SinkHandle, SinkError> {
    let layout = ChannelLayout::from_channel_count(info.channels).ok_or_else(|| {
        SinkError::UnsupportedFormat(format!("{} channels", info.channels))
    })?;
    if info.sample_rate == 0 {
        return Err(SinkError::UnsupportedFormat("sample rate of 0 Hz".to_string()));
    }
    let format = StreamFormat {
        sample_rate: info.sample_rate,
        layout,
    };

    let timer = OperationTimer::new(format!("open output stream on {}", route.name));

    let min_bytes = backend.min_buffer_bytes(&format, route)?;
    if min_bytes == 0 {
        return Err(SinkError::MinBufferQuery("device reported 0 bytes".to_string()));
    }
    let buffer_bytes = min_bytes * buffer_multiplier.max(1);
    info!(
        "Opening {} on {} with a {} byte buffer (minimum {})",
        format, route.name, buffer_bytes, min_bytes
    );

    let mut sink = SinkHandle::new(backend.open_stream(format, route, buffer_bytes)?);

    if !sink.bind_route(route)? {
        return Err(SinkError::RouteBindFailed(route.name.clone()));
    }

    sink.start()?;
    let state = sink.play_state();
    if state != PlayState::Playing {
        return Err(SinkError::BadDeviceState(format!("{:?}", state)));
    }

    timer.finish_with_threshold(Duration::from_millis(200));
    Ok(sink)
}

/// Owns an output stream and stops then releases it when dropped
pub struct SinkHandle {
    stream: Box<dyn SinkStream>,
}

impl SinkHandle {
    pub fn new(stream: Box<dyn SinkStream>) -> Self {
        Self { stream }
    }

    /// Write a frame, treating any shortfall as fatal
    pub fn write_frame(&mut self, frame: &PcmFrame) -> Result<usize, SinkError> {
        let expected = frame.byte_len();
        let written = self.stream.write(frame)?;
        if written < expected {
            return Err(SinkError::WriteError(format!(
                "wrote {} of {} bytes",
                written, expected
            )));
        }
        Ok(written)
    }

    /// Whether this stream already plays `info`
    pub fn matches(&self, info: StreamInfo) -> bool {
        let format = self.stream.format();
        format.sample_rate == info.sample_rate && format.channels() == info.channels
    }
}

impl Deref for SinkHandle {
    type Target = dyn SinkStream;

    fn deref(&self) -> &Self::Target {
        self.stream.as_ref()
    }
}

impl DerefMut for SinkHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stream.as_mut()
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stream.stop() {
            warn!("Failed to stop output stream: {}", e);
        }
        self.stream.release();
        debug!("Output stream released");
    }
}
