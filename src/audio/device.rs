use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleFormat, StreamConfig, SupportedBufferSize, SupportedStreamConfig};
use log::{debug, error, info, warn};

use crate::audio::buffer::PcmBuffer;
use crate::audio::sink::{AudioBackend, PlayState, SinkStream};
use crate::config::OutputConfig;
use crate::error::SinkError;
use crate::models::{OutputRoute, PcmFrame, RouteKind, StreamFormat};

/// Longest a write may wait on a device that has stopped consuming audio
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(2);
/// Slack added to the buffered duration when draining
const DRAIN_MARGIN: Duration = Duration::from_millis(500);

/// Output backend over the default cpal host
pub struct CpalBackend {
    output: OutputConfig,
}

impl CpalBackend {
    pub fn new(output: OutputConfig) -> Self {
        Self { output }
    }

    /// Classify a device by its name against the configured telephony device and keywords
    pub fn classify(&self, device_name: &str) -> RouteKind {
        if let Some(name) = &self.output.telephony_device {
            return if name == device_name {
                RouteKind::Telephony
            } else {
                RouteKind::Other
            };
        }

        let lowered = device_name.to_lowercase();
        let matches_keyword = self
            .output
            .telephony_keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && lowered.contains(&keyword.to_lowercase()));

        if matches_keyword {
            RouteKind::Telephony
        } else {
            RouteKind::Other
        }
    }

    fn host(&self) -> Host {
        cpal::default_host()
    }

    fn find_device(host: &Host, route: &OutputRoute) -> Result<Device, String> {
        let devices = host
            .output_devices()
            .map_err(|e| format!("Failed to enumerate devices: {}", e))?;

        for device in devices {
            match device.name() {
                Ok(name) if name == route.id => return Ok(device),
                Ok(_) => {}
                Err(e) => debug!("Skipping unnamed output device: {}", e),
            }
        }
        Err(format!("output device '{}' is gone", route.name))
    }

    fn min_buffer_frames(&self, format: &StreamFormat, config: &SupportedStreamConfig) -> usize {
        let floor = format.bytes_for(Duration::from_millis(self.output.min_buffer_ms)) / format.frame_bytes();
        match config.buffer_size() {
            SupportedBufferSize::Range { min, .. } => (*min as usize).max(floor),
            SupportedBufferSize::Unknown => floor,
        }
    }
}

/// Find a device configuration playing `format` exactly, preferring native 16-bit output
fn supported_config(device: &Device, format: &StreamFormat) -> Result<SupportedStreamConfig, String> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| format!("Failed to get supported configs: {}", e))?;

    let rate = cpal::SampleRate(format.sample_rate);
    let mut candidates: Vec<SupportedStreamConfig> = configs
        .filter(|range| range.channels() == format.channels())
        .filter(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
        .filter(|range| {
            matches!(range.sample_format(), SampleFormat::I16 | SampleFormat::F32 | SampleFormat::U16)
        })
        .map(|range| range.with_sample_rate(rate))
        .collect();

    candidates.sort_by_key(|config| match config.sample_format() {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        _ => 2,
    });

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| format!("device does not support {}", format))
}

impl AudioBackend for CpalBackend {
    fn enumerate_outputs(&self) -> Result<Vec<OutputRoute>, SinkError> {
        let devices = self
            .host()
            .output_devices()
            .map_err(|e| SinkError::Enumeration(e.to_string()))?;

        let mut routes = Vec::new();
        for device in devices {
            let name = match device.name() {
                Ok(name) => name,
                Err(e) => {
                    debug!("Skipping unnamed output device: {}", e);
                    continue;
                }
            };
            let kind = self.classify(&name);
            routes.push(OutputRoute::new(name.clone(), name, kind));
        }
        Ok(routes)
    }

    fn min_buffer_bytes(&self, format: &StreamFormat, route: &OutputRoute) -> Result<usize, SinkError> {
        let host = self.host();
        let device = Self::find_device(&host, route).map_err(SinkError::MinBufferQuery)?;
        let config = supported_config(&device, format).map_err(SinkError::MinBufferQuery)?;

        Ok(self.min_buffer_frames(format, &config) * format.frame_bytes())
    }

    fn open_stream(
        &self,
        format: StreamFormat,
        route: &OutputRoute,
        buffer_bytes: usize,
    ) -> Result<Box<dyn SinkStream>, SinkError> {
        let capacity_frames = buffer_bytes / format.frame_bytes();
        debug!("Allocating {} frames of output buffer for {}", capacity_frames, route.name);
        Ok(Box::new(CpalSinkStream::new(format, capacity_frames)))
    }
}

/// A cpal output stream fed from a `PcmBuffer`
pub struct CpalSinkStream {
    format: StreamFormat,
    buffer: Arc<PcmBuffer>,
    stream: Option<cpal::Stream>,
    state: PlayState,
    device_error: Arc<Mutex<Option<String>>>,
}

impl CpalSinkStream {
    pub fn new(format: StreamFormat, capacity_frames: usize) -> Self {
        Self {
            format,
            buffer: Arc::new(PcmBuffer::new(capacity_frames, format.channels(), format.sample_rate)),
            stream: None,
            state: PlayState::Stopped,
            device_error: Arc::new(Mutex::new(None)),
        }
    }

    fn device_error(&self) -> Option<String> {
        match self.device_error.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn binding_confirmed(&self) -> bool {
        self.device_error().is_none()
    }

    fn build_stream<T>(&self, device: &Device, config: &StreamConfig) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: cpal::SizedSample + cpal::FromSample<i16> + Send + 'static,
    {
        let buffer = Arc::clone(&self.buffer);
        let device_error = Arc::clone(&self.device_error);

        device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                buffer.read_into(data);
            },
            move |err| {
                error!("Output stream error: {}", err);
                if let Ok(mut slot) = device_error.lock() {
                    *slot = Some(err.to_string());
                }
            },
            None,
        )
    }
}

impl SinkStream for CpalSinkStream {
    fn format(&self) -> StreamFormat {
        self.format
    }

    /// Opening the named cpal device is the binding. It stays confirmed only while the device
    /// has reported no error on the new stream.
    fn bind_route(&mut self, route: &OutputRoute) -> Result<bool, SinkError> {
        let host = cpal::default_host();
        let device = CpalBackend::find_device(&host, route).map_err(SinkError::RouteBindFailed)?;
        let supported = supported_config(&device, &self.format).map_err(SinkError::RouteBindFailed)?;

        let config = StreamConfig {
            channels: self.format.channels(),
            sample_rate: cpal::SampleRate(self.format.sample_rate),
            buffer_size: BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::I16 => self.build_stream::<i16>(&device, &config),
            SampleFormat::F32 => self.build_stream::<f32>(&device, &config),
            SampleFormat::U16 => self.build_stream::<u16>(&device, &config),
            other => {
                return Err(SinkError::UnsupportedFormat(format!("device sample format {:?}", other)));
            }
        }
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => SinkError::DeviceBusy(route.name.clone()),
            other => SinkError::RouteBindFailed(format!("{}: {}", route.name, other)),
        })?;

        self.stream = Some(stream);
        if !self.binding_confirmed() {
            let err = self.device_error().unwrap_or_default();
            warn!("Output device {} reported an error while binding: {}", route.name, err);
            return Ok(false);
        }
        info!(
            "Output stream bound to {} as {:?} with a {} sample buffer",
            route.name,
            supported.sample_format(),
            self.buffer.capacity()
        );
        Ok(true)
    }

    fn start(&mut self) -> Result<(), SinkError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| SinkError::BadDeviceState("stream is not bound".to_string()))?;
        stream
            .play()
            .map_err(|e| SinkError::BadDeviceState(e.to_string()))?;
        self.state = PlayState::Playing;
        Ok(())
    }

    fn play_state(&self) -> PlayState {
        if self.device_error().is_some() {
            return PlayState::Stopped;
        }
        self.state
    }

    fn write(&mut self, frame: &PcmFrame) -> Result<usize, SinkError> {
        if let Some(err) = self.device_error() {
            return Err(SinkError::WriteError(err));
        }
        if self.state != PlayState::Playing {
            return Err(SinkError::WriteError(format!("stream is {:?}", self.state)));
        }

        let written = self.buffer.write_blocking(&frame.samples, WRITE_STALL_TIMEOUT);
        Ok(written * StreamFormat::BYTES_PER_SAMPLE)
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        self.buffer.mark_ending();
        let timeout = self.buffer.buffered_duration() + DRAIN_MARGIN;
        if !self.buffer.wait_until_empty(timeout) {
            warn!("Output did not drain within {}ms", timeout.as_millis());
        }

        let underruns = self.buffer.underrun_count();
        if underruns > 0 {
            warn!("Output stream ran dry {} time(s)", underruns);
        }

        match self.device_error() {
            Some(err) => Err(SinkError::WriteError(err)),
            None => Ok(()),
        }
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        if self.state == PlayState::Stopped {
            return Ok(());
        }
        self.state = PlayState::Stopped;
        self.buffer.close();
        if let Some(stream) = &self.stream {
            stream
                .pause()
                .map_err(|e| SinkError::BadDeviceState(e.to_string()))?;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.buffer.close();
        if self.stream.take().is_some() {
            debug!("Closed output stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelLayout;

    fn backend_with(device: Option<&str>, keywords: &[&str]) -> CpalBackend {
        CpalBackend::new(OutputConfig {
            telephony_device: device.map(str::to_string),
            telephony_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            min_buffer_ms: 20,
        })
    }

    #[test]
    fn test_classify_by_keyword() {
        let backend = backend_with(None, &["telephony", "voice"]);
        assert_eq!(backend.classify("USB Telephony Adapter"), RouteKind::Telephony);
        assert_eq!(backend.classify("Modem VOICE out"), RouteKind::Telephony);
        assert_eq!(backend.classify("Built-in Speakers"), RouteKind::Other);
    }

    #[test]
    fn test_classify_exact_device_wins() {
        let backend = backend_with(Some("Line Out 2"), &["line"]);
        assert_eq!(backend.classify("Line Out 2"), RouteKind::Telephony);
        assert_eq!(backend.classify("Line Out 1"), RouteKind::Other);
    }

    #[test]
    fn test_empty_keyword_matches_nothing() {
        let backend = backend_with(None, &[""]);
        assert_eq!(backend.classify("Speakers"), RouteKind::Other);
    }

    #[test]
    fn test_unbound_stream_rejects_start_and_write() {
        let format = StreamFormat { sample_rate: 8000, layout: ChannelLayout::Mono };
        let mut stream = CpalSinkStream::new(format, 160);

        assert_eq!(stream.play_state(), PlayState::Stopped);
        assert!(matches!(stream.start(), Err(SinkError::BadDeviceState(_))));
        assert!(matches!(
            stream.write(&PcmFrame::new(vec![0; 8])),
            Err(SinkError::WriteError(_))
        ));

        stream.stop().unwrap();
        stream.release();
        stream.release();
    }

    #[test]
    fn test_device_error_revokes_binding() {
        let format = StreamFormat { sample_rate: 8000, layout: ChannelLayout::Mono };
        let mut stream = CpalSinkStream::new(format, 160);
        assert!(stream.binding_confirmed());

        *stream.device_error.lock().unwrap() = Some("device unplugged".to_string());

        assert!(!stream.binding_confirmed());
        assert_eq!(stream.play_state(), PlayState::Stopped);
        match stream.write(&PcmFrame::new(vec![0; 8])) {
            Err(SinkError::WriteError(message)) => assert_eq!(message, "device unplugged"),
            other => panic!("expected write error, got {:?}", other),
        }
    }

    #[test]
    fn test_enumerate_outputs_does_not_panic() {
        let backend = backend_with(None, &["telephony"]);
        if let Ok(routes) = backend.enumerate_outputs() {
            for route in routes {
                assert_eq!(route.id, route.name);
            }
        }
    }
}
