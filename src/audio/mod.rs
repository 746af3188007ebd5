/// Sound synthesis engine
///
/// Owns the single output device and the shared output gain stage, and turns
/// `play_sound` requests into freshly synthesized voices.
///
/// Initialization has two phases. Construction runs on a dedicated device
/// thread while the caller blocks, so it completes inside the caller's frame.
/// Resuming is a message to that thread and never blocks.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};

pub mod backend;
pub mod mixer;
pub mod nodes;
pub mod voices;

use backend::{CpalBackend, OutputBackend};
use mixer::Mixer;
use voices::Voice;
pub use voices::{Sound, UnknownSound};

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,

    #[error("failed to read default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("failed to pause output stream: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),

    #[error("unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(f32),

    #[error("audio device thread failed: {0}")]
    DeviceThread(String),
}

/// Lifecycle of the output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Suspended,
    Running,
    Closed,
}

pub type SharedDeviceState = Arc<Mutex<DeviceState>>;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Level of the shared output gain stage
    pub master_gain: f32,
    /// Require `initialize_sync` from a user action before the engine is ready
    pub gesture_gated: bool,
    pub max_voices: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            master_gain: 0.7,
            gesture_gated: false,
            max_voices: 32,
        }
    }
}

/// What the step scheduler needs from a sound source
pub trait SoundSink: Send + Sync {
    fn initialize(&self) -> Result<(), AudioError>;
    /// Initialize from a user action; construction completes before returning
    fn initialize_sync(&self) -> Result<(), AudioError>;
    /// Best effort, never fails into the caller
    fn play_sound(&self, sound: Sound);
}

enum DeviceCommand {
    Resume,
    Suspend,
    Close,
}

enum DeviceSlot {
    Empty,
    Open(DeviceHandle),
    /// Construction failed; background paths stop retrying until an explicit initialize
    Failed,
}

struct DeviceHandle {
    commands: Sender<DeviceCommand>,
    sample_rate: f32,
    thread: Option<JoinHandle<()>>,
}

impl DeviceHandle {
    fn spawn(
        backend: Arc<dyn OutputBackend>,
        mixer: Arc<Mutex<Mixer>>,
        state: SharedDeviceState,
    ) -> Result<Self, AudioError> {
        let (opened_tx, opened_rx) = mpsc::channel();
        let (commands, command_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("drumseq-audio".to_string())
            .spawn(move || {
                let mut device = match backend.open(mixer, Arc::clone(&state)) {
                    Ok(device) => {
                        set_state(&state, DeviceState::Suspended);
                        let _ = opened_tx.send(Ok(device.sample_rate()));
                        device
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };

                for command in command_rx {
                    match command {
                        DeviceCommand::Resume => match device.resume() {
                            Ok(()) => {
                                log::info!("output device running");
                                set_state(&state, DeviceState::Running);
                            }
                            Err(e) => log::warn!("failed to resume output device: {e}"),
                        },
                        DeviceCommand::Suspend => match device.suspend() {
                            Ok(()) => {
                                log::info!("output device suspended");
                                set_state(&state, DeviceState::Suspended);
                            }
                            Err(e) => log::warn!("failed to suspend output device: {e}"),
                        },
                        DeviceCommand::Close => break,
                    }
                }

                set_state(&state, DeviceState::Closed);
            })
            .map_err(|e| AudioError::DeviceThread(e.to_string()))?;

        match opened_rx.recv() {
            Ok(Ok(sample_rate)) => Ok(Self {
                commands,
                sample_rate,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::DeviceThread(
                    "device thread exited during construction".to_string(),
                ))
            }
        }
    }

    fn send(&self, command: DeviceCommand) {
        if self.commands.send(command).is_err() {
            log::warn!("audio device thread is gone");
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(DeviceCommand::Close);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Inner {
    config: EngineConfig,
    backend: Arc<dyn OutputBackend>,
    device: Mutex<DeviceSlot>,
    mixer: Arc<Mutex<Mixer>>,
    state: SharedDeviceState,
    unlocked: AtomicBool,
    // A background initialize is queued or running
    init_pending: AtomicBool,
}

/// Handle to the synthesis engine. Clones share the same device.
#[derive(Clone)]
pub struct SynthEngine {
    inner: Arc<Inner>,
}

impl SynthEngine {
    pub fn new(config: EngineConfig, backend: impl OutputBackend + 'static) -> Self {
        let mixer = Mixer::new(config.master_gain, config.max_voices);
        Self {
            inner: Arc::new(Inner {
                config,
                backend: Arc::new(backend),
                device: Mutex::new(DeviceSlot::Empty),
                mixer: Arc::new(Mutex::new(mixer)),
                state: Arc::new(Mutex::new(DeviceState::Uninitialized)),
                unlocked: AtomicBool::new(false),
                init_pending: AtomicBool::new(false),
            }),
        }
    }

    /// Engine on the default cpal host
    pub fn with_default_output(config: EngineConfig) -> Self {
        Self::new(config, CpalBackend)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Construct the device if needed, then request a resume without waiting
    pub fn initialize(&self) -> Result<(), AudioError> {
        if self.construct()? {
            self.send(DeviceCommand::Resume);
        }
        Ok(())
    }

    /// Like `initialize`, and records the user action that unlocks output on
    /// gesture-gated platforms. An existing suspended device is resumed.
    pub fn initialize_sync(&self) -> Result<(), AudioError> {
        let created = self.construct()?;
        self.inner.unlocked.store(true, Ordering::SeqCst);
        if created {
            self.send(DeviceCommand::Resume);
        } else {
            self.recover();
        }
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        let open = matches!(*self.device(), DeviceSlot::Open(_));
        open && self.state() != DeviceState::Closed && self.unlocked()
    }

    pub fn state(&self) -> DeviceState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resume a suspended device. Never recreates it.
    pub fn recover(&self) {
        if self.state() == DeviceState::Suspended {
            log::info!("recovering suspended output device");
            self.send(DeviceCommand::Resume);
        }
    }

    /// Pause a running device, e.g. when the app is backgrounded
    pub fn suspend(&self) {
        if self.state() == DeviceState::Running {
            self.send(DeviceCommand::Suspend);
        }
    }

    pub fn master_gain(&self) -> f32 {
        self.mixer().master_gain()
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.mixer().set_master_gain(gain);
    }

    pub fn active_voices(&self) -> usize {
        self.mixer().active_voices()
    }

    pub fn play_sound(&self, sound: Sound) {
        let slot = match self.inner.device.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            // Construction in progress on another thread
            Err(TryLockError::WouldBlock) => {
                self.initialize_then_play(sound);
                return;
            }
        };

        let opened = match &*slot {
            DeviceSlot::Open(handle) => Some(handle.sample_rate),
            DeviceSlot::Empty => None,
            DeviceSlot::Failed => {
                log::debug!("no output device, skipping {sound}");
                return;
            }
        };
        drop(slot);

        let Some(sample_rate) = opened else {
            self.initialize_then_play(sound);
            return;
        };
        if self.state() != DeviceState::Closed && self.unlocked() {
            self.emit(sound, sample_rate);
        } else {
            log::debug!("output not ready, skipping {sound}");
        }
    }

    /// Play a sound by name; unknown names are ignored
    pub fn play_named(&self, name: &str) {
        match name.parse::<Sound>() {
            Ok(sound) => self.play_sound(sound),
            Err(e) => log::debug!("{e}"),
        }
    }

    fn unlocked(&self) -> bool {
        !self.inner.config.gesture_gated || self.inner.unlocked.load(Ordering::SeqCst)
    }

    fn device(&self) -> MutexGuard<'_, DeviceSlot> {
        self.inner
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.inner
            .mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if this call constructed the device
    fn construct(&self) -> Result<bool, AudioError> {
        let mut slot = self.device();
        if let DeviceSlot::Open(_) = *slot {
            return Ok(false);
        }

        match DeviceHandle::spawn(
            Arc::clone(&self.inner.backend),
            Arc::clone(&self.inner.mixer),
            Arc::clone(&self.inner.state),
        ) {
            Ok(handle) => {
                log::info!("output device constructed at {} Hz", handle.sample_rate);
                *slot = DeviceSlot::Open(handle);
                Ok(true)
            }
            Err(e) => {
                *slot = DeviceSlot::Failed;
                Err(e)
            }
        }
    }

    fn send(&self, command: DeviceCommand) {
        if let DeviceSlot::Open(handle) = &*self.device() {
            handle.send(command);
        }
    }

    /// At most one background initialize at a time. Sounds requested while
    /// one is pending are dropped.
    fn initialize_then_play(&self, sound: Sound) {
        if self.inner.init_pending.swap(true, Ordering::SeqCst) {
            log::debug!("audio initialization pending, skipping {sound}");
            return;
        }

        let engine = self.clone();
        let spawned = thread::Builder::new()
            .name("drumseq-init".to_string())
            .spawn(move || {
                let result = engine.initialize();
                engine.inner.init_pending.store(false, Ordering::SeqCst);
                match result {
                    Ok(()) => engine.play_sound(sound),
                    Err(e) => log::error!("audio initialization failed: {e}"),
                }
            });
        if let Err(e) = spawned {
            self.inner.init_pending.store(false, Ordering::SeqCst);
            log::error!("failed to spawn audio initialization: {e}");
        }
    }

    fn emit(&self, sound: Sound, sample_rate: f32) {
        match Voice::build(sound, sample_rate) {
            Ok(voice) => self.mixer().push(voice),
            Err(e) => log::error!("failed to synthesize {sound}: {e}"),
        }
    }
}

impl SoundSink for SynthEngine {
    fn initialize(&self) -> Result<(), AudioError> {
        SynthEngine::initialize(self)
    }

    fn initialize_sync(&self) -> Result<(), AudioError> {
        SynthEngine::initialize_sync(self)
    }

    fn play_sound(&self, sound: Sound) {
        SynthEngine::play_sound(self, sound)
    }
}

fn set_state(state: &SharedDeviceState, next: DeviceState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}
