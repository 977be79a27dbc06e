//! Scripted stand-ins for the media, decoder and output seams.
//!
//! Every mock records what it acquired and released in a shared `ResourceCounters`.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use symphonia::core::audio::Channels;
use symphonia::core::codecs::CodecParameters;

use crate::audio::decoder::{DecoderFactory, DecoderOutput, DecoderSession, PollWait, SubmitStatus};
use crate::audio::engine::{EngineComponents, EngineSettings};
use crate::audio::sink::{AudioBackend, PlayState, SinkStream};
use crate::audio::source::{MediaOpener, MediaSource, TrackDescriptor};
use crate::error::{DecodeError, SinkError, SourceError};
use crate::models::{EncodedUnit, OutputRoute, PcmFrame, RouteKind, StreamFormat, StreamInfo};

/// Acquisition and release bookkeeping shared by all mocks of one test
#[derive(Debug, Default)]
pub struct ResourceCounters {
    pub sources_opened: AtomicUsize,
    pub sources_released: AtomicUsize,
    pub decoders_created: AtomicUsize,
    pub decoders_started: AtomicUsize,
    pub decoders_released: AtomicUsize,
    pub sinks_opened: AtomicUsize,
    pub sinks_started: AtomicUsize,
    pub sinks_released: AtomicUsize,
    pub drains: AtomicUsize,
    pub rejected_submits: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl ResourceCounters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn bump(&self, counter: &AtomicUsize, entry: &str) {
        counter.fetch_add(1, Ordering::SeqCst);
        self.record(entry);
    }

    fn record(&self, entry: &str) {
        self.log.lock().unwrap().push(entry.to_string());
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Position of the first log entry equal to `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|e| e == entry)
    }

    /// Every acquired resource has been released exactly once
    pub fn all_released(&self) -> bool {
        Self::get(&self.sources_opened) == Self::get(&self.sources_released)
            && Self::get(&self.decoders_created) == Self::get(&self.decoders_released)
            && Self::get(&self.sinks_opened) == Self::get(&self.sinks_released)
    }
}

fn channel_mask(count: u16) -> Channels {
    Channels::from_bits_truncate((1u32 << count) - 1)
}

/// Track and payload script for `MockSource`
#[derive(Debug, Clone)]
pub struct SourceScript {
    pub tracks: Vec<(u32, Option<u32>, u16)>,
    pub units: usize,
    pub fail_read_at: Option<usize>,
    pub panic_at: Option<usize>,
    /// How long opening the file takes
    pub open_delay: Duration,
}

impl Default for SourceScript {
    fn default() -> Self {
        Self {
            tracks: vec![(1, Some(8000), 1)],
            units: 5,
            fail_read_at: None,
            panic_at: None,
            open_delay: Duration::ZERO,
        }
    }
}

pub struct MockSource {
    counters: Arc<ResourceCounters>,
    script: SourceScript,
    selected: Option<u32>,
    next_unit: usize,
    finished: bool,
    released: bool,
}

impl MockSource {
    pub fn new(counters: &Arc<ResourceCounters>) -> Self {
        Self::from_script(counters, SourceScript { tracks: Vec::new(), ..SourceScript::default() })
    }

    fn from_script(counters: &Arc<ResourceCounters>, script: SourceScript) -> Self {
        counters.bump(&counters.sources_opened, "source.open");
        Self {
            counters: Arc::clone(counters),
            script,
            selected: None,
            next_unit: 0,
            finished: false,
            released: false,
        }
    }

    pub fn with_track(mut self, id: u32, sample_rate: Option<u32>, channels: u16) -> Self {
        self.script.tracks.push((id, sample_rate, channels));
        self
    }

    pub fn selected(&self) -> Option<u32> {
        self.selected
    }
}

impl MediaSource for MockSource {
    fn tracks(&self) -> Vec<TrackDescriptor> {
        self.script
            .tracks
            .iter()
            .map(|(id, rate, channels)| {
                let mut params = CodecParameters::new();
                params.with_channels(channel_mask(*channels));
                if let Some(rate) = rate {
                    params.with_sample_rate(*rate);
                }
                TrackDescriptor::new(*id, params)
            })
            .collect()
    }

    fn select_track(&mut self, track_id: u32) -> Result<(), SourceError> {
        if !self.script.tracks.iter().any(|(id, _, _)| *id == track_id) {
            return Err(SourceError::UnknownTrack(track_id));
        }
        self.selected = Some(track_id);
        Ok(())
    }

    fn read_next(&mut self) -> Result<EncodedUnit, SourceError> {
        let track_id = self.selected.ok_or(SourceError::UnknownTrack(0))?;
        if self.finished {
            return Err(SourceError::Exhausted);
        }
        if self.script.panic_at == Some(self.next_unit) {
            panic!("corrupt unit {}", self.next_unit);
        }
        if self.script.fail_read_at == Some(self.next_unit) {
            return Err(SourceError::ReadFailed(format!("unit {}", self.next_unit)));
        }
        if self.next_unit >= self.script.units {
            self.finished = true;
            return Ok(EncodedUnit::end_of_stream(track_id));
        }

        let timestamp = self.next_unit as u64;
        self.next_unit += 1;
        Ok(EncodedUnit::new(track_id, timestamp, 1, vec![timestamp as u8; 4].into_boxed_slice()))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.counters.bump(&self.counters.sources_released, "source.release");
        }
    }
}

pub struct MockOpener {
    counters: Arc<ResourceCounters>,
    script: SourceScript,
    opened: Mutex<Vec<PathBuf>>,
}

impl MockOpener {
    pub fn new(counters: &Arc<ResourceCounters>, script: SourceScript) -> Self {
        Self {
            counters: Arc::clone(counters),
            script,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }
}

impl MediaOpener for MockOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>, SourceError> {
        if path.to_string_lossy().contains("missing") {
            return Err(SourceError::NotFound {
                path: path.display().to_string(),
            });
        }
        if !self.script.open_delay.is_zero() {
            thread::sleep(self.script.open_delay);
        }
        self.opened.lock().unwrap().push(path.to_path_buf());
        Ok(Box::new(MockSource::from_script(&self.counters, self.script.clone())))
    }
}

/// Output script for `MockDecoderSession`
#[derive(Debug, Clone)]
pub struct DecoderScript {
    pub output: StreamInfo,
    pub samples_per_unit: usize,
    pub announce_format: bool,
    /// Format announced after the first decoded unit
    pub switch_to: Option<StreamInfo>,
    /// Reject every n-th submit attempt with `NotReady`
    pub reject_every: usize,
    /// Produce no output until the end-of-stream unit has been submitted
    pub hold_until_end: bool,
    /// Time each blocking poll takes
    pub drain_delay: Duration,
}

impl Default for DecoderScript {
    fn default() -> Self {
        Self {
            output: StreamInfo { sample_rate: 8000, channels: 1 },
            samples_per_unit: 16,
            announce_format: true,
            switch_to: None,
            reject_every: 0,
            hold_until_end: false,
            drain_delay: Duration::ZERO,
        }
    }
}

pub struct MockDecoderFactory {
    counters: Arc<ResourceCounters>,
    script: DecoderScript,
    failing: Vec<u32>,
}

impl MockDecoderFactory {
    pub fn new(counters: &Arc<ResourceCounters>) -> Self {
        Self::with_script(counters, DecoderScript::default())
    }

    pub fn with_script(counters: &Arc<ResourceCounters>, script: DecoderScript) -> Self {
        Self {
            counters: Arc::clone(counters),
            script,
            failing: Vec::new(),
        }
    }

    pub fn failing_for(mut self, track_id: u32) -> Self {
        self.failing.push(track_id);
        self
    }
}

impl DecoderFactory for MockDecoderFactory {
    fn create(&self, track: &TrackDescriptor) -> Result<Box<dyn DecoderSession>, DecodeError> {
        if self.failing.contains(&track.id) {
            return Err(DecodeError::Configuration(format!("track {} rejected", track.id)));
        }
        self.counters.bump(&self.counters.decoders_created, "decoder.create");
        Ok(Box::new(MockDecoderSession {
            counters: Arc::clone(&self.counters),
            script: self.script.clone(),
            started: false,
            released: false,
            submit_attempts: 0,
            decoded_units: 0,
            announced: false,
            input: VecDeque::new(),
            output: VecDeque::new(),
        }))
    }
}

pub struct MockDecoderSession {
    counters: Arc<ResourceCounters>,
    script: DecoderScript,
    started: bool,
    released: bool,
    submit_attempts: usize,
    decoded_units: usize,
    announced: bool,
    input: VecDeque<EncodedUnit>,
    output: VecDeque<DecoderOutput>,
}

impl MockDecoderSession {
    fn decode(&mut self, unit: EncodedUnit) {
        if unit.end_of_stream {
            self.output.push_back(DecoderOutput::Frame(PcmFrame::end_of_stream(Vec::new())));
            return;
        }
        if self.script.announce_format && !self.announced {
            self.announced = true;
            self.output.push_back(DecoderOutput::FormatChanged(self.script.output));
        }
        if self.decoded_units == 1 {
            if let Some(switch_to) = self.script.switch_to {
                self.output.push_back(DecoderOutput::FormatChanged(switch_to));
            }
        }
        self.decoded_units += 1;
        let samples = vec![unit.timestamp as i16; self.script.samples_per_unit];
        self.output.push_back(DecoderOutput::Frame(PcmFrame::new(samples)));
    }
}

impl DecoderSession for MockDecoderSession {
    fn start(&mut self) -> Result<(), DecodeError> {
        self.started = true;
        self.counters.bump(&self.counters.decoders_started, "decoder.start");
        Ok(())
    }

    fn submit(&mut self, unit: EncodedUnit) -> Result<SubmitStatus, DecodeError> {
        if !self.started {
            return Err(DecodeError::NotStarted);
        }
        self.submit_attempts += 1;
        if self.script.reject_every > 0 && self.submit_attempts % self.script.reject_every == 0 {
            self.counters.rejected_submits.fetch_add(1, Ordering::SeqCst);
            return Ok(SubmitStatus::NotReady(unit));
        }
        self.input.push_back(unit);
        Ok(SubmitStatus::Accepted)
    }

    fn poll(&mut self, wait: PollWait) -> Result<DecoderOutput, DecodeError> {
        if !self.started {
            return Err(DecodeError::NotStarted);
        }
        if wait == PollWait::Blocking && !self.script.drain_delay.is_zero() {
            thread::sleep(self.script.drain_delay);
        }
        let end_submitted = self.input.back().map_or(false, |unit| unit.end_of_stream);
        if self.script.hold_until_end && !end_submitted && self.output.is_empty() {
            return Ok(DecoderOutput::NotReady);
        }
        if self.output.is_empty() {
            if let Some(unit) = self.input.pop_front() {
                self.decode(unit);
            }
        }
        Ok(self.output.pop_front().unwrap_or(DecoderOutput::NotReady))
    }

    fn stop(&mut self) -> Result<(), DecodeError> {
        if self.started {
            self.started = false;
            self.counters.record("decoder.stop");
        }
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.counters.bump(&self.counters.decoders_released, "decoder.release");
        }
    }
}

/// State shared between a `MockBackend` and the streams it opens.
///
/// The route goes to whichever stream bound it last; a stream that lost it fails its writes.
#[derive(Debug, Default)]
pub struct MockOutput {
    route_owner: AtomicUsize,
    next_stream: AtomicUsize,
    pub written: Mutex<Vec<i16>>,
    pub opened: Mutex<Vec<(StreamFormat, usize)>>,
}

impl MockOutput {
    pub fn route_in_use(&self) -> bool {
        self.route_owner.load(Ordering::SeqCst) != 0
    }
}

/// Behaviour script for `MockBackend`
#[derive(Debug, Clone)]
pub struct OutputScript {
    pub routes: Vec<OutputRoute>,
    pub min_buffer: Result<usize, String>,
    pub confirm_bind: bool,
    pub state_after_start: PlayState,
    pub write_delay: Duration,
    pub short_write: bool,
}

impl Default for OutputScript {
    fn default() -> Self {
        Self {
            routes: vec![
                OutputRoute::new("spk", "Speakers", RouteKind::Other),
                OutputRoute::new("tel", "Telephony Out", RouteKind::Telephony),
            ],
            min_buffer: Ok(640),
            confirm_bind: true,
            state_after_start: PlayState::Playing,
            write_delay: Duration::ZERO,
            short_write: false,
        }
    }
}

pub struct MockBackend {
    counters: Arc<ResourceCounters>,
    script: OutputScript,
    pub output: Arc<MockOutput>,
}

impl MockBackend {
    pub fn new(counters: &Arc<ResourceCounters>, script: OutputScript) -> Self {
        Self {
            counters: Arc::clone(counters),
            script,
            output: Arc::new(MockOutput::default()),
        }
    }
}

impl AudioBackend for MockBackend {
    fn enumerate_outputs(&self) -> Result<Vec<OutputRoute>, SinkError> {
        Ok(self.script.routes.clone())
    }

    fn min_buffer_bytes(&self, _format: &StreamFormat, _route: &OutputRoute) -> Result<usize, SinkError> {
        self.script.min_buffer.clone().map_err(SinkError::MinBufferQuery)
    }

    fn open_stream(
        &self,
        format: StreamFormat,
        _route: &OutputRoute,
        buffer_bytes: usize,
    ) -> Result<Box<dyn SinkStream>, SinkError> {
        self.counters.bump(&self.counters.sinks_opened, "sink.open");
        self.output.opened.lock().unwrap().push((format, buffer_bytes));
        Ok(Box::new(MockSinkStream {
            counters: Arc::clone(&self.counters),
            script: self.script.clone(),
            output: Arc::clone(&self.output),
            stream_id: self.output.next_stream.fetch_add(1, Ordering::SeqCst) + 1,
            format,
            route_name: String::new(),
            state: PlayState::Stopped,
            released: false,
        }))
    }
}

pub struct MockSinkStream {
    counters: Arc<ResourceCounters>,
    script: OutputScript,
    output: Arc<MockOutput>,
    stream_id: usize,
    format: StreamFormat,
    route_name: String,
    state: PlayState,
    released: bool,
}

impl MockSinkStream {
    fn owns_route(&self) -> bool {
        self.output.route_owner.load(Ordering::SeqCst) == self.stream_id
    }
}

impl SinkStream for MockSinkStream {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn bind_route(&mut self, route: &OutputRoute) -> Result<bool, SinkError> {
        self.route_name = route.name.clone();
        if self.output.route_owner.swap(self.stream_id, Ordering::SeqCst) != 0 {
            self.counters.record("route.taken");
        }
        Ok(self.script.confirm_bind)
    }

    fn start(&mut self) -> Result<(), SinkError> {
        self.counters.bump(&self.counters.sinks_started, "sink.start");
        self.state = self.script.state_after_start;
        Ok(())
    }

    fn play_state(&self) -> PlayState {
        self.state
    }

    fn write(&mut self, frame: &PcmFrame) -> Result<usize, SinkError> {
        if !self.script.write_delay.is_zero() {
            thread::sleep(self.script.write_delay);
        }
        if !self.owns_route() {
            return Err(SinkError::DeviceBusy(self.route_name.clone()));
        }
        self.counters.record("sink.write");
        self.output.written.lock().unwrap().extend_from_slice(&frame.samples);
        if self.script.short_write && !frame.is_empty() {
            return Ok(frame.byte_len() / 2);
        }
        Ok(frame.byte_len())
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        self.counters.bump(&self.counters.drains, "sink.drain");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        if self.state != PlayState::Stopped {
            self.state = PlayState::Stopped;
            self.counters.record("sink.stop");
        }
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.output.route_owner.compare_exchange(self.stream_id, 0, Ordering::SeqCst, Ordering::SeqCst);
            self.counters.bump(&self.counters.sinks_released, "sink.release");
        }
    }
}

/// A fully mocked pipeline
pub struct MockPipeline {
    pub counters: Arc<ResourceCounters>,
    pub opener: Arc<MockOpener>,
    pub backend: Arc<MockBackend>,
    pub components: EngineComponents,
}

impl MockPipeline {
    pub fn new(source: SourceScript, decoder: DecoderScript, output: OutputScript) -> Self {
        Self::with_factory(source, output, |counters| MockDecoderFactory::with_script(counters, decoder))
    }

    pub fn with_factory<F>(source: SourceScript, output: OutputScript, factory: F) -> Self
    where
        F: FnOnce(&Arc<ResourceCounters>) -> MockDecoderFactory,
    {
        let counters = Arc::new(ResourceCounters::default());
        let opener = Arc::new(MockOpener::new(&counters, source));
        let backend = Arc::new(MockBackend::new(&counters, output));
        let decoders = Arc::new(factory(&counters));

        let components = EngineComponents::new(
            Arc::clone(&opener) as Arc<dyn MediaOpener>,
            decoders,
            Arc::clone(&backend) as Arc<dyn AudioBackend>,
        );

        Self {
            counters,
            opener,
            backend,
            components,
        }
    }

    pub fn standard() -> Self {
        Self::new(SourceScript::default(), DecoderScript::default(), OutputScript::default())
    }

    pub fn written(&self) -> Vec<i16> {
        self.backend.output.written.lock().unwrap().clone()
    }

    pub fn opened_sinks(&self) -> Vec<(StreamFormat, usize)> {
        self.backend.output.opened.lock().unwrap().clone()
    }
}

/// Engine settings with a short poll timeout for tests
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        poll_timeout: Duration::from_millis(5),
        buffer_multiplier: 3,
        fallback_file: None,
    }
}

/// Write a 16-bit PCM WAV file of `frames` frames
pub fn write_test_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
    let data_len = (frames * channels as usize * 2) as u32;
    let mut file = File::create(path).unwrap();

    file.write_all(b"RIFF").unwrap();
    file.write_all(&(36 + data_len).to_le_bytes()).unwrap();
    file.write_all(b"WAVE").unwrap();
    file.write_all(b"fmt ").unwrap();
    file.write_all(&16u32.to_le_bytes()).unwrap();
    file.write_all(&1u16.to_le_bytes()).unwrap();
    file.write_all(&channels.to_le_bytes()).unwrap();
    file.write_all(&sample_rate.to_le_bytes()).unwrap();
    file.write_all(&(sample_rate * channels as u32 * 2).to_le_bytes()).unwrap();
    file.write_all(&(channels * 2).to_le_bytes()).unwrap();
    file.write_all(&16u16.to_le_bytes()).unwrap();
    file.write_all(b"data").unwrap();
    file.write_all(&data_len.to_le_bytes()).unwrap();

    let mut data = Vec::with_capacity(data_len as usize);
    for i in 0..frames * channels as usize {
        let sample = ((i % 100) as i16 - 50) * 200;
        data.extend_from_slice(&sample.to_le_bytes());
    }
    file.write_all(&data).unwrap();
}
