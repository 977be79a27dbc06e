use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::audio::engine::{EngineComponents, EngineSettings, PlaybackEngine};
use crate::error::PlaybackError;
use crate::models::{PlaybackEvent, PlaybackOutcome};

/// Keeps at most one running engine per sound id.
///
/// Starting a sound that is already playing pre-empts the old engine. Finished engines
/// deregister themselves and their outcome is forwarded on the event channel returned by
/// `new`.
pub struct PlaybackRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    engines: Mutex<HashMap<String, PlaybackEngine>>,
    stopped: Mutex<Vec<PlaybackEngine>>,
    components: EngineComponents,
    settings: Mutex<EngineSettings>,
    events: Mutex<Sender<PlaybackEvent>>,
}

impl PlaybackRegistry {
    pub fn new(components: EngineComponents, settings: EngineSettings) -> (Self, Receiver<PlaybackEvent>) {
        let (events_tx, events_rx) = mpsc::channel();
        let registry = Self {
            inner: Arc::new(RegistryInner {
                engines: Mutex::new(HashMap::new()),
                stopped: Mutex::new(Vec::new()),
                components,
                settings: Mutex::new(settings),
                events: Mutex::new(events_tx),
            }),
        };
        (registry, events_rx)
    }

    /// Replace the settings used by engines started from now on
    pub fn update_settings(&self, settings: EngineSettings) {
        *lock(&self.inner.settings) = settings;
    }

    /// Start playing `resource` (or the configured fallback file) under `sound_id`.
    ///
    /// Returns the id of the new engine. Any engine already registered under `sound_id` is
    /// cancelled, and the new one waits for it to release its resources before acquiring its
    /// own.
    pub fn play(&self, sound_id: &str, resource: Option<PathBuf>) -> Result<u64, PlaybackError> {
        let settings = lock(&self.inner.settings).clone();
        let mut engine = PlaybackEngine::new(sound_id, resource, self.inner.components.clone(), settings);
        let engine_id = engine.id();

        let registry = Arc::downgrade(&self.inner);
        let on_finished = move |event: PlaybackEvent| {
            if let Some(inner) = registry.upgrade() {
                inner.finish(event);
            }
        };

        let mut engines = lock(&self.inner.engines);
        let previous = engines.remove(sound_id);
        if let Some(previous) = &previous {
            info!("Pre-empting engine {} for sound {}", previous.id(), sound_id);
            previous.cancel();
        }

        engine.start(previous, on_finished)?;
        engines.insert(sound_id.to_string(), engine);
        info!("Started engine {} for sound {}", engine_id, sound_id);
        Ok(engine_id)
    }

    /// Cancel the engine playing `sound_id`. Returns false when nothing was playing.
    pub fn stop(&self, sound_id: &str) -> bool {
        let engine = lock(&self.inner.engines).remove(sound_id);
        match engine {
            Some(engine) => {
                info!("Stopping engine {} for sound {}", engine.id(), sound_id);
                engine.cancel();
                self.inner.retire(vec![engine]);
                true
            }
            None => {
                debug!("No engine playing sound {}", sound_id);
                false
            }
        }
    }

    /// Cancel every registered engine
    pub fn stop_all(&self) {
        let engines: Vec<PlaybackEngine> = lock(&self.inner.engines).drain().map(|(_, e)| e).collect();
        if engines.is_empty() {
            return;
        }

        info!("Stopping {} engine(s)", engines.len());
        for engine in &engines {
            engine.cancel();
        }
        self.inner.retire(engines);
    }

    pub fn is_playing(&self, sound_id: &str) -> bool {
        lock(&self.inner.engines).contains_key(sound_id)
    }

    /// Sound ids with a registered engine, sorted
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.engines).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wait until no engine is registered and every stopped engine has exited.
    ///
    /// Returns false if that did not happen within `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let stopped: Vec<PlaybackEngine> = lock(&self.inner.stopped).drain(..).collect();
            let mut still_running = Vec::new();
            for mut engine in stopped {
                if engine.is_finished() {
                    engine.join();
                } else {
                    still_running.push(engine);
                }
            }
            let idle = still_running.is_empty() && lock(&self.inner.engines).is_empty();
            lock(&self.inner.stopped).extend(still_running);

            if idle {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("Playback engines still running after {}ms", timeout.as_millis());
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for PlaybackRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl RegistryInner {
    /// Deregister a finished engine unless a newer one has taken its place, then publish the event
    fn finish(&self, event: PlaybackEvent) {
        {
            let mut engines = lock(&self.engines);
            let current = engines.get(&event.sound_id).map(PlaybackEngine::id);
            if current == Some(event.engine_id) {
                engines.remove(&event.sound_id);
            }
        }

        match &event.outcome {
            PlaybackOutcome::Completed => info!("Sound {} finished playing", event.sound_id),
            PlaybackOutcome::Cancelled => info!("Sound {} was cancelled", event.sound_id),
            PlaybackOutcome::Failed(reason) => {
                error!("Failed to play sound {}: {}", event.sound_id, reason)
            }
        }

        if lock(&self.events).send(event).is_err() {
            debug!("No listener for playback events");
        }
    }

    fn retire(&self, engines: Vec<PlaybackEngine>) {
        let mut stopped = lock(&self.stopped);
        stopped.retain(|engine| !engine.is_finished());
        stopped.extend(engines);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
