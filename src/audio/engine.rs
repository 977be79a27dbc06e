use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::audio::decoder::{DecoderFactory, DecoderHandle, DecoderOutput, PollWait, SubmitStatus, SymphoniaDecoderFactory};
use crate::audio::device::CpalBackend;
use crate::audio::sink::{find_telephony_route, open_sink, AudioBackend, SinkHandle};
use crate::audio::source::{select_audio_track, MediaOpener, SourceHandle, SymphoniaOpener};
use crate::config::PlayerConfig;
use crate::error::PlaybackError;
use crate::models::{EngineState, EncodedUnit, OutputRoute, PcmFrame, PlaybackEvent, PlaybackOutcome, StreamInfo};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// The collaborators an engine acquires its resources from
#[derive(Clone)]
pub struct EngineComponents {
    pub media: Arc<dyn MediaOpener>,
    pub decoders: Arc<dyn DecoderFactory>,
    pub output: Arc<dyn AudioBackend>,
}

impl EngineComponents {
    pub fn new(
        media: Arc<dyn MediaOpener>,
        decoders: Arc<dyn DecoderFactory>,
        output: Arc<dyn AudioBackend>,
    ) -> Self {
        Self { media, decoders, output }
    }

    /// symphonia for demuxing and decoding, cpal for output
    pub fn system(config: &PlayerConfig) -> Self {
        Self {
            media: Arc::new(SymphoniaOpener::new()),
            decoders: Arc::new(SymphoniaDecoderFactory::new(
                config.engine.decoder_input_queue,
                config.engine.decoder_output_queue,
            )),
            output: Arc::new(CpalBackend::new(config.output.clone())),
        }
    }
}

/// Tuning shared by every engine a registry starts
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub poll_timeout: Duration,
    pub buffer_multiplier: usize,
    /// Played when an engine is started without an explicit resource
    pub fallback_file: Option<PathBuf>,
}

impl EngineSettings {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            poll_timeout: config.engine.poll_timeout(),
            buffer_multiplier: config.engine.buffer_multiplier,
            fallback_file: config.audio_file.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&PlayerConfig::default())
    }
}

/// One playback attempt running on its own thread.
///
/// The engine moves through `Idle -> Running -> Draining -> Terminated` and never backwards.
/// Its outcome is delivered exactly once through the callback given to `start`.
pub struct PlaybackEngine {
    id: u64,
    sound_id: String,
    cancelled: Arc<AtomicBool>,
    state: Arc<Mutex<EngineState>>,
    task: Option<EngineTask>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    pub fn new(
        sound_id: impl Into<String>,
        resource: Option<PathBuf>,
        components: EngineComponents,
        settings: EngineSettings,
    ) -> Self {
        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        let sound_id = sound_id.into();
        let cancelled = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(EngineState::Idle));

        let task = EngineTask {
            id,
            sound_id: sound_id.clone(),
            tag: format!("Engine/{}[{}]", id, sound_id),
            resource,
            components,
            settings,
            cancelled: Arc::clone(&cancelled),
            state: Arc::clone(&state),
        };

        Self {
            id,
            sound_id,
            cancelled,
            state,
            task: Some(task),
            thread: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sound_id(&self) -> &str {
        &self.sound_id
    }

    pub fn state(&self) -> EngineState {
        read_state(&self.state)
    }

    /// Request termination. Never blocks; safe to call at any time and more than once.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!("Cancellation requested for engine {}", self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the engine thread has exited
    pub fn is_finished(&self) -> bool {
        match &self.thread {
            Some(thread) => thread.is_finished(),
            None => self.task.is_none(),
        }
    }

    /// Spawn the engine thread.
    ///
    /// A `predecessor` is joined on the new thread before any resource is acquired, so its
    /// route and decoder are released first without blocking the caller.
    pub fn start<F>(&mut self, predecessor: Option<PlaybackEngine>, on_finished: F) -> Result<(), PlaybackError>
    where
        F: FnOnce(PlaybackEvent) + Send + 'static,
    {
        let task = self
            .task
            .take()
            .ok_or_else(|| PlaybackError::ThreadSpawn("engine was already started".to_string()))?;

        let handle = thread::Builder::new()
            .name(format!("engine-{}", self.id))
            .spawn(move || {
                raise_thread_priority();
                if let Some(mut predecessor) = predecessor {
                    debug!("Waiting for engine {} to release its resources", predecessor.id());
                    predecessor.join();
                }
                task.run(on_finished);
            })
            .map_err(|e| PlaybackError::ThreadSpawn(e.to_string()))?;

        self.thread = Some(handle);
        Ok(())
    }

    /// Wait for the engine thread to exit
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Engine {} thread panicked outside playback", self.id);
            }
        }
    }
}

enum Finish {
    Completed,
    Cancelled,
}

enum Flushed {
    Pending,
    EndOfStream,
    Cancelled,
}

struct EngineTask {
    id: u64,
    sound_id: String,
    tag: String,
    resource: Option<PathBuf>,
    components: EngineComponents,
    settings: EngineSettings,
    cancelled: Arc<AtomicBool>,
    state: Arc<Mutex<EngineState>>,
}

impl EngineTask {
    fn run<F>(self, on_finished: F)
    where
        F: FnOnce(PlaybackEvent),
    {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.play())) {
            Ok(Ok(Finish::Completed)) => {
                info!("{} Playback completed", self.tag);
                PlaybackOutcome::Completed
            }
            Ok(Ok(Finish::Cancelled)) => {
                info!("{} Playback cancelled", self.tag);
                PlaybackOutcome::Cancelled
            }
            Ok(Err(e)) => {
                error!("{} {}", self.tag, e);
                PlaybackOutcome::Failed(e.to_string())
            }
            Err(payload) => {
                let e = PlaybackError::Panicked(panic_message(payload.as_ref()));
                error!("{} {}", self.tag, e);
                PlaybackOutcome::Failed(e.to_string())
            }
        };

        self.advance(EngineState::Terminated(outcome.termination()));

        on_finished(PlaybackEvent {
            sound_id: self.sound_id,
            engine_id: self.id,
            outcome,
        });
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn advance(&self, next: EngineState) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.can_advance_to(next) {
            trace!("{} {:?} -> {:?}", self.tag, *state, next);
            *state = next;
        } else {
            warn!("{} Ignoring transition {:?} -> {:?}", self.tag, *state, next);
        }
    }

    /// Acquire resources in order, run the transfer loop, and release in reverse order
    fn play(&self) -> Result<Finish, PlaybackError> {
        if self.is_cancelled() {
            info!("{} Cancelled before start", self.tag);
            return Ok(Finish::Cancelled);
        }
        self.advance(EngineState::Running);

        let route = find_telephony_route(self.components.output.as_ref())?;
        info!("{} Using telephony output {}", self.tag, route.name);

        let path = self
            .resource
            .clone()
            .or_else(|| self.settings.fallback_file.clone())
            .ok_or(PlaybackError::NoInputSelected)?;
        info!("{} Playing {}", self.tag, path.display());

        let mut source = SourceHandle::open(self.components.media.as_ref(), &path)?;
        let (format, mut decoder) = select_audio_track(&mut *source, self.components.decoders.as_ref())?;
        debug!("{} Track format: {}", self.tag, format.format_description());

        decoder.start()?;

        let mut sink: Option<SinkHandle> = None;
        self.transfer(&route, &mut source, &mut decoder, &mut sink)
    }

    fn transfer(
        &self,
        route: &OutputRoute,
        source: &mut SourceHandle,
        decoder: &mut DecoderHandle,
        sink: &mut Option<SinkHandle>,
    ) -> Result<Finish, PlaybackError> {
        let mut pending: Option<EncodedUnit> = None;

        loop {
            if self.is_cancelled() {
                return Ok(Finish::Cancelled);
            }

            let unit = match pending.take() {
                Some(unit) => unit,
                None => source.read_next()?,
            };
            let end_of_stream = unit.end_of_stream;

            match decoder.submit(unit)? {
                SubmitStatus::Accepted if end_of_stream => {
                    debug!("{} Submitted end of stream", self.tag);
                    self.advance(EngineState::Draining);
                    break;
                }
                SubmitStatus::Accepted => {}
                SubmitStatus::NotReady(unit) => {
                    trace!("{} Decoder input full", self.tag);
                    pending = Some(unit);
                }
            }

            let wait = PollWait::Bounded(self.settings.poll_timeout);
            if let Flushed::EndOfStream = self.flush(route, decoder, sink, wait, false)? {
                return self.finish(sink);
            }
        }

        match self.flush(route, decoder, sink, PollWait::Blocking, true)? {
            Flushed::Cancelled => Ok(Finish::Cancelled),
            _ => self.finish(sink),
        }
    }

    /// Move decoder output to the sink until the decoder has nothing ready.
    ///
    /// While draining this keeps polling until the end-of-stream frame arrives.
    fn flush(
        &self,
        route: &OutputRoute,
        decoder: &mut DecoderHandle,
        sink: &mut Option<SinkHandle>,
        wait: PollWait,
        draining: bool,
    ) -> Result<Flushed, PlaybackError> {
        loop {
            if draining && self.is_cancelled() {
                return Ok(Flushed::Cancelled);
            }

            match decoder.poll(wait)? {
                DecoderOutput::FormatChanged(info) => self.negotiate(route, info, sink)?,
                DecoderOutput::Frame(frame) => {
                    self.write(&frame, sink)?;
                    if frame.end_of_stream {
                        debug!("{} Decoder fully flushed", self.tag);
                        return Ok(Flushed::EndOfStream);
                    }
                }
                DecoderOutput::NotReady if draining => {}
                DecoderOutput::NotReady => return Ok(Flushed::Pending),
            }
        }
    }

    fn negotiate(&self, route: &OutputRoute, info: StreamInfo, sink: &mut Option<SinkHandle>) -> Result<(), PlaybackError> {
        if let Some(current) = sink.as_ref() {
            if current.matches(info) {
                debug!("{} Decoder repeated output format {}", self.tag, info);
                return Ok(());
            }
            return Err(PlaybackError::FormatRenegotiated {
                from: current.format().to_string(),
                to: info.to_string(),
            });
        }

        info!("{} Decoder output format {}", self.tag, info);
        let handle = open_sink(
            self.components.output.as_ref(),
            info,
            route,
            self.settings.buffer_multiplier,
        )?;
        *sink = Some(handle);
        Ok(())
    }

    fn write(&self, frame: &PcmFrame, sink: &mut Option<SinkHandle>) -> Result<(), PlaybackError> {
        match sink {
            Some(handle) => {
                handle.write_frame(frame)?;
                Ok(())
            }
            None if frame.is_empty() => Ok(()),
            None => Err(PlaybackError::FrameBeforeFormat),
        }
    }

    fn finish(&self, sink: &mut Option<SinkHandle>) -> Result<Finish, PlaybackError> {
        if let Some(handle) = sink.as_mut() {
            handle.drain()?;
        } else {
            warn!("{} Input contained no audio", self.tag);
        }
        Ok(Finish::Completed)
    }
}

fn read_state(state: &Mutex<EngineState>) -> EngineState {
    match state.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn raise_thread_priority() {
    #[cfg(target_os = "macos")]
    unsafe {
        let thread = libc::pthread_self();
        let mut policy: libc::c_int = 0;
        let mut param: libc::sched_param = std::mem::zeroed();

        if libc::pthread_getschedparam(thread, &mut policy, &mut param) == 0 {
            param.sched_priority = 63;
            let _ = libc::pthread_setschedparam(thread, libc::SCHED_FIFO, &param);
        }
    }
}
