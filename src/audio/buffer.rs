use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Bounded interleaved PCM16 queue shared between the engine thread and the device callback.
///
/// Writers block while the queue is full; the callback never blocks on anything but the
/// queue lock and pads with silence when it runs dry.
#[derive(Debug)]
pub struct PcmBuffer {
    state: Mutex<BufferState>,
    space_available: Condvar,
    drained: Condvar,
    capacity: usize,
    channels: u16,
    sample_rate: u32,
    underrun_count: AtomicUsize,
}

#[derive(Debug, Default)]
struct BufferState {
    samples: VecDeque<i16>,
    closed: bool,
    ending: bool,
}

impl PcmBuffer {
    /// Create a buffer holding `capacity_frames` interleaved frames
    pub fn new(capacity_frames: usize, channels: u16, sample_rate: u32) -> Self {
        let capacity = capacity_frames.max(1) * channels.max(1) as usize;
        Self {
            state: Mutex::new(BufferState {
                samples: VecDeque::with_capacity(capacity),
                ..BufferState::default()
            }),
            space_available: Condvar::new(),
            drained: Condvar::new(),
            capacity,
            channels: channels.max(1),
            sample_rate,
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Total capacity in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples currently queued
    pub fn available_read(&self) -> usize {
        self.lock().samples.len()
    }

    /// Playback time of the queued samples
    pub fn buffered_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.available_read() / self.channels as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    /// Queue samples, blocking while the buffer is full.
    ///
    /// Returns the number of samples queued. The count is short when the buffer is closed
    /// or when the reader made no progress for `stall_timeout`.
    pub fn write_blocking(&self, data: &[i16], stall_timeout: Duration) -> usize {
        let mut written = 0;
        let mut state = self.lock();
        let mut last_progress = Instant::now();

        while written < data.len() {
            if state.closed {
                break;
            }

            let space = self.capacity.saturating_sub(state.samples.len());
            if space == 0 {
                let waited = last_progress.elapsed();
                if waited >= stall_timeout {
                    log::warn!("Output buffer stalled for {}ms", waited.as_millis());
                    break;
                }
                state = match self.space_available.wait_timeout(state, stall_timeout - waited) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
                continue;
            }

            let chunk = space.min(data.len() - written);
            state.samples.extend(&data[written..written + chunk]);
            written += chunk;
            last_progress = Instant::now();
        }

        written
    }

    /// Fill `out` from the queue, padding the remainder with silence.
    ///
    /// Returns the number of real samples copied.
    pub fn read_into<T>(&self, out: &mut [T]) -> usize
    where
        T: cpal::Sample + cpal::FromSample<i16>,
    {
        let mut state = self.lock();
        let available = state.samples.len().min(out.len());

        for (slot, sample) in out.iter_mut().zip(state.samples.drain(..available)) {
            *slot = T::from_sample(sample);
        }
        for slot in out[available..].iter_mut() {
            *slot = T::EQUILIBRIUM;
        }

        if available < out.len() && !state.ending && !state.closed {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }

        let empty = state.samples.is_empty();
        drop(state);

        self.space_available.notify_all();
        if empty {
            self.drained.notify_all();
        }
        available
    }

    /// Mark the end of input so a running-dry callback no longer counts as an underrun
    pub fn mark_ending(&self) {
        self.lock().ending = true;
    }

    /// Wait until every queued sample has been consumed. Returns false on timeout.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        while !state.samples.is_empty() && !state.closed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.drained.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Close the buffer, discarding queued samples and waking any blocked writer
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.samples.clear();
        }
        self.space_available.notify_all();
        self.drained.notify_all();
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
