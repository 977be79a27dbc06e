use std::ops::{Deref, DerefMut};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use crate::audio::source::TrackDescriptor;
use crate::error::DecodeError;
use crate::models::{EncodedUnit, PcmFrame, StreamInfo};

/// Consecutive undecodable packets tolerated before the session gives up
const MAX_DECODE_RETRIES: usize = 3;

/// How long a poll may wait for decoded output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollWait {
    Bounded(Duration),
    Blocking,
}

/// Result of offering one encoded unit to a decoder session
#[derive(Debug, PartialEq)]
pub enum SubmitStatus {
    Accepted,
    /// No input slot was free; the unit is handed back for a later retry
    NotReady(EncodedUnit),
}

/// What one poll of a decoder session produced
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderOutput {
    Frame(PcmFrame),
    FormatChanged(StreamInfo),
    NotReady,
}

/// Creates decoder sessions for selected tracks
pub trait DecoderFactory: Send + Sync {
    /// Create and configure a session. Fails when no codec handles the track.
    fn create(&self, track: &TrackDescriptor) -> Result<Box<dyn DecoderSession>, DecodeError>;
}

/// An asynchronous codec instance with bounded input and output queues.
///
/// A session reports `FormatChanged` before its first non-empty frame and answers an
/// end-of-stream unit with exactly one end-of-stream frame. `stop` and `release` must be
/// safe to call more than once.
pub trait DecoderSession {
    fn start(&mut self) -> Result<(), DecodeError>;

    fn submit(&mut self, unit: EncodedUnit) -> Result<SubmitStatus, DecodeError>;

    fn poll(&mut self, wait: PollWait) -> Result<DecoderOutput, DecodeError>;

    fn stop(&mut self) -> Result<(), DecodeError>;

    fn release(&mut self);
}

/// Owns a decoder session and stops then releases it when dropped
pub struct DecoderHandle {
    session: Box<dyn DecoderSession>,
}

impl DecoderHandle {
    pub fn new(session: Box<dyn DecoderSession>) -> Self {
        Self { session }
    }
}

impl Deref for DecoderHandle {
    type Target = dyn DecoderSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for DecoderHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for DecoderHandle {
    fn drop(&mut self) {
        if let Err(e) = self.session.stop() {
            warn!("Failed to stop decoder: {}", e);
        }
        self.session.release();
        debug!("Decoder released");
    }
}

/// Builds symphonia-backed sessions from the default codec registry
#[derive(Debug, Clone)]
pub struct SymphoniaDecoderFactory {
    input_queue: usize,
    output_queue: usize,
}

impl SymphoniaDecoderFactory {
    pub fn new(input_queue: usize, output_queue: usize) -> Self {
        Self {
            input_queue: input_queue.max(1),
            output_queue: output_queue.max(1),
        }
    }
}

impl Default for SymphoniaDecoderFactory {
    fn default() -> Self {
        Self::new(4, 8)
    }
}

impl DecoderFactory for SymphoniaDecoderFactory {
    fn create(&self, track: &TrackDescriptor) -> Result<Box<dyn DecoderSession>, DecodeError> {
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(_) => DecodeError::Unsupported {
                    codec: track.codec_name(),
                },
                other => DecodeError::Configuration(other.to_string()),
            })?;

        debug!("Created {} decoder for track {}", track.codec_name(), track.id);
        Ok(Box::new(SymphoniaDecoderSession {
            name: format!("decoder-{}", track.id),
            pending_decoder: Some(decoder),
            input: None,
            output: None,
            worker: None,
            input_queue: self.input_queue,
            output_queue: self.output_queue,
        }))
    }
}

type WorkerMessage = Result<DecoderOutput, DecodeError>;

/// Runs a symphonia decoder on its own worker thread behind bounded channels
pub struct SymphoniaDecoderSession {
    name: String,
    pending_decoder: Option<Box<dyn Decoder>>,
    input: Option<SyncSender<EncodedUnit>>,
    output: Option<Receiver<WorkerMessage>>,
    worker: Option<JoinHandle<()>>,
    input_queue: usize,
    output_queue: usize,
}

impl SymphoniaDecoderSession {
    /// The fatal error the worker queued before exiting, behind any frames it decoded first
    fn take_worker_error(&mut self) -> DecodeError {
        if let Some(output) = self.output.as_ref() {
            while let Ok(message) = output.try_recv() {
                if let Err(e) = message {
                    return e;
                }
            }
        }
        DecodeError::SessionClosed
    }
}

impl DecoderSession for SymphoniaDecoderSession {
    fn start(&mut self) -> Result<(), DecodeError> {
        let decoder = self.pending_decoder.take().ok_or(DecodeError::SessionClosed)?;

        let (input_tx, input_rx) = mpsc::sync_channel(self.input_queue);
        let (output_tx, output_rx) = mpsc::sync_channel(self.output_queue);

        let worker = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_worker(decoder, input_rx, output_tx))
            .map_err(|e| DecodeError::Configuration(format!("failed to spawn decoder thread: {}", e)))?;

        self.input = Some(input_tx);
        self.output = Some(output_rx);
        self.worker = Some(worker);
        debug!("Started {}", self.name);
        Ok(())
    }

    fn submit(&mut self, unit: EncodedUnit) -> Result<SubmitStatus, DecodeError> {
        let input = self.input.as_ref().ok_or(DecodeError::NotStarted)?;

        match input.try_send(unit) {
            Ok(()) => Ok(SubmitStatus::Accepted),
            Err(TrySendError::Full(unit)) => Ok(SubmitStatus::NotReady(unit)),
            Err(TrySendError::Disconnected(_)) => Err(self.take_worker_error()),
        }
    }

    fn poll(&mut self, wait: PollWait) -> Result<DecoderOutput, DecodeError> {
        let output = self.output.as_ref().ok_or(DecodeError::NotStarted)?;

        let message = match wait {
            PollWait::Bounded(timeout) => match output.recv_timeout(timeout) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => return Ok(DecoderOutput::NotReady),
                Err(RecvTimeoutError::Disconnected) => return Err(DecodeError::SessionClosed),
            },
            PollWait::Blocking => output.recv().map_err(|_| DecodeError::SessionClosed)?,
        };

        message
    }

    fn stop(&mut self) -> Result<(), DecodeError> {
        if self.input.take().is_some() {
            trace!("Closed input of {}", self.name);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.input.take();
        self.output.take();
        self.pending_decoder.take();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("{} panicked", self.name);
            } else {
                debug!("Joined {}", self.name);
            }
        }
    }
}

impl Drop for SymphoniaDecoderSession {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_worker(
    mut decoder: Box<dyn Decoder>,
    input: Receiver<EncodedUnit>,
    output: SyncSender<WorkerMessage>,
) {
    let mut announced: Option<StreamInfo> = None;
    let mut sample_buf: Option<SampleBuffer<i16>> = None;
    let mut consecutive_errors = 0;

    while let Ok(unit) = input.recv() {
        if unit.end_of_stream {
            let _ = output.send(Ok(DecoderOutput::Frame(PcmFrame::end_of_stream(Vec::new()))));
            return;
        }

        let packet = Packet::new_from_boxed_slice(unit.track_id, unit.timestamp, unit.duration, unit.data);

        let samples = match decoder.decode(&packet) {
            Ok(decoded) => {
                consecutive_errors = 0;

                let spec = *decoded.spec();
                let info = StreamInfo {
                    sample_rate: spec.rate,
                    channels: spec.channels.count() as u16,
                };
                if announced != Some(info) {
                    announced = Some(info);
                    sample_buf = None;
                    if output.send(Ok(DecoderOutput::FormatChanged(info))).is_err() {
                        return;
                    }
                }

                if decoded.frames() == 0 {
                    continue;
                }

                let needed = decoded.capacity() * spec.channels.count();
                if sample_buf.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }

                match sample_buf.as_mut() {
                    Some(buf) => {
                        buf.copy_interleaved_ref(decoded);
                        buf.samples().to_vec()
                    }
                    None => continue,
                }
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                consecutive_errors += 1;
                warn!("Skipping undecodable packet ({}/{}): {}", consecutive_errors, MAX_DECODE_RETRIES, msg);
                if consecutive_errors > MAX_DECODE_RETRIES {
                    let _ = output.send(Err(DecodeError::DecodeFailed(msg.to_string())));
                    return;
                }
                continue;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => {
                let _ = output.send(Err(DecodeError::DecodeFailed(e.to_string())));
                return;
            }
        };

        if output.send(Ok(DecoderOutput::Frame(PcmFrame::new(samples)))).is_err() {
            return;
        }
    }

    trace!("Decoder input closed");
}
