/// Core sequencer logic - pattern state and step scheduling
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::audio::{Sound, SoundSink};
use crate::share::SharedPattern;

pub mod playback;

use playback::{PlaybackEvent, TickTask};

pub const STEPS: usize = 16;

/// Capacity of the playback event queue; events beyond it are dropped
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// 1-based position in the pattern
    pub id: usize,
    pub sound: Option<Sound>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    steps: [Step; STEPS],
}

impl Pattern {
    pub fn new() -> Self {
        Self::from_sounds([None; STEPS])
    }

    pub fn from_sounds(sounds: [Option<Sound>; STEPS]) -> Self {
        let mut steps = [Step { id: 0, sound: None }; STEPS];
        for (index, (step, sound)) in steps.iter_mut().zip(sounds).enumerate() {
            *step = Step {
                id: index + 1,
                sound,
            };
        }
        Self { steps }
    }

    pub fn steps(&self) -> &[Step; STEPS] {
        &self.steps
    }

    pub fn sounds(&self) -> [Option<Sound>; STEPS] {
        self.steps.map(|step| step.sound)
    }

    /// Sound at a 0-based index
    pub fn sound_at(&self, index: usize) -> Option<Sound> {
        self.steps.get(index).and_then(|step| step.sound)
    }

    pub fn step(&self, id: usize) -> Option<&Step> {
        id.checked_sub(1).and_then(|index| self.steps.get(index))
    }

    pub fn step_mut(&mut self, id: usize) -> Option<&mut Step> {
        id.checked_sub(1).and_then(|index| self.steps.get_mut(index))
    }

    pub fn clear(&mut self) {
        for step in &mut self.steps {
            step.sound = None;
        }
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new()
    }
}

/// What a step click does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    Sound(Sound),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoRange {
    pub min: u32,
    pub max: u32,
}

impl TempoRange {
    /// Range between two bounds given in either order
    pub fn new(a: u32, b: u32) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Same range with `min <= max`
    pub fn normalized(&self) -> Self {
        Self::new(self.min, self.max)
    }

    pub fn clamp(&self, bpm: u32) -> u32 {
        let range = self.normalized();
        bpm.clamp(range.min, range.max)
    }

    pub fn contains(&self, bpm: u32) -> bool {
        let range = self.normalized();
        (range.min..=range.max).contains(&bpm)
    }
}

impl Default for TempoRange {
    fn default() -> Self {
        Self { min: 30, max: 200 }
    }
}

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub tempo_range: TempoRange,
    pub default_tempo: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            tempo_range: TempoRange::default(),
            default_tempo: 64,
        }
    }
}

/// Time between steps: sixteenth notes at `bpm` quarter notes per minute
pub fn step_interval(bpm: u32) -> Duration {
    Duration::from_secs_f64(step_duration_ms(bpm) / 1000.0)
}

pub fn step_duration_ms(bpm: u32) -> f64 {
    60_000.0 / (f64::from(bpm.max(1)) * 4.0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerState {
    pub is_playing: bool,
    /// 0-based index of the lit step
    pub current_step: usize,
    pub tempo: u32,
    pub pattern: Pattern,
}

impl SequencerState {
    pub fn new(tempo: u32) -> Self {
        Self {
            is_playing: false,
            current_step: 0,
            tempo,
            pattern: Pattern::new(),
        }
    }

    /// Move to the next step and return it with its sound.
    /// The step is read once here; later edits only affect future visits.
    pub fn advance(&mut self) -> (usize, Option<Sound>) {
        self.current_step = (self.current_step + 1) % STEPS;
        (self.current_step, self.pattern.sound_at(self.current_step))
    }

    pub fn assign(&mut self, step_id: usize, selection: Selection) {
        let Some(step) = self.pattern.step_mut(step_id) else {
            return;
        };
        step.sound = match selection {
            Selection::None => return,
            Selection::Delete => None,
            Selection::Sound(sound) if step.sound == Some(sound) => None,
            Selection::Sound(sound) => Some(sound),
        };
    }
}

/// Step scheduler: owns the sequencer state and the ticking task
pub struct Sequencer {
    config: SequencerConfig,
    state: Arc<Mutex<SequencerState>>,
    sink: Arc<dyn SoundSink>,
    selection: Selection,
    task: Option<TickTask>,
    events_tx: SyncSender<PlaybackEvent>,
    events_rx: Receiver<PlaybackEvent>,
}

impl Sequencer {
    pub fn new(mut config: SequencerConfig, sink: Arc<dyn SoundSink>) -> Self {
        config.tempo_range = config.tempo_range.normalized();
        let tempo = config.tempo_range.clamp(config.default_tempo);
        let (events_tx, events_rx) = sync_channel(EVENT_CAPACITY);

        Self {
            config,
            state: Arc::new(Mutex::new(SequencerState::new(tempo))),
            sink,
            selection: Selection::None,
            task: None,
            events_tx,
            events_rx,
        }
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SequencerState {
        self.lock_state().clone()
    }

    pub fn is_playing(&self) -> bool {
        self.task.is_some()
    }

    pub fn tempo(&self) -> u32 {
        self.lock_state().tempo
    }

    pub fn current_step(&self) -> usize {
        self.lock_state().current_step
    }

    pub fn pattern(&self) -> Pattern {
        self.lock_state().pattern.clone()
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
    }

    pub fn toggle_play_pause(&mut self) {
        if self.is_playing() {
            self.stop();
        } else {
            self.start();
        }
    }

    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        if let Err(e) = self.sink.initialize() {
            log::error!("failed to initialize audio for playback: {e}");
        }

        let tempo = {
            let mut state = self.lock_state();
            state.is_playing = true;
            state.tempo
        };
        let interval = step_interval(tempo);
        self.spawn_task(interval, Instant::now() + interval);
        if self.task.is_some() {
            log::info!("playback started at {tempo} BPM");
        }
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
            log::info!("playback stopped");
        }
        let mut state = self.lock_state();
        state.is_playing = false;
        state.current_step = 0;
    }

    /// Clamp and store the tempo. A running task is swapped for one at the new
    /// interval; the tick already waiting keeps its deadline.
    pub fn update_tempo(&mut self, bpm: u32) {
        let tempo = self.config.tempo_range.clamp(bpm);
        self.lock_state().tempo = tempo;

        if let Some(task) = self.task.take() {
            // Cancel first so two tasks never overlap
            let pending = task.cancel();
            let first = pending.max(Instant::now());
            self.spawn_task(step_interval(tempo), first);
            log::debug!("tempo changed to {tempo} BPM while playing");
        }
    }

    pub fn assign_sound_to_step(&mut self, step_id: usize, selection: Selection) {
        self.lock_state().assign(step_id, selection);
    }

    /// Apply the current selection to a step
    pub fn click_step(&mut self, step_id: usize) {
        let selection = self.selection;
        self.assign_sound_to_step(step_id, selection);
    }

    /// Audition a sound outside the loop. Call from a user action.
    pub fn preview_sound(&self, sound: Sound) {
        if let Err(e) = self.sink.initialize_sync() {
            log::error!("failed to initialize audio for preview: {e}");
            return;
        }
        self.sink.play_sound(sound);
    }

    pub fn clear_pattern(&mut self) {
        self.lock_state().pattern.clear();
    }

    /// Replace tempo and pattern with whatever a share link carried
    pub fn load_shared(&mut self, shared: SharedPattern) {
        if let Some(pattern) = shared.pattern {
            self.lock_state().pattern = pattern;
        }
        if let Some(tempo) = shared.tempo {
            self.update_tempo(tempo);
        }
    }

    /// Drain step and trigger events published by the ticking task
    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        self.events_rx.try_iter().collect()
    }

    fn spawn_task(&mut self, interval: Duration, first_tick: Instant) {
        match TickTask::spawn(
            interval,
            first_tick,
            Arc::clone(&self.state),
            Arc::clone(&self.sink),
            self.events_tx.clone(),
        ) {
            Ok(task) => self.task = Some(task),
            Err(e) => {
                log::error!("failed to start playback: {e}");
                let mut state = self.lock_state();
                state.is_playing = false;
                state.current_step = 0;
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::AudioError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub played: Mutex<Vec<(Sound, Instant)>>,
        pub initialized: AtomicUsize,
        pub initialized_sync: AtomicUsize,
    }

    impl RecordingSink {
        pub fn plays(&self) -> Vec<(Sound, Instant)> {
            self.played.lock().unwrap().clone()
        }
    }

    impl SoundSink for RecordingSink {
        fn initialize(&self) -> Result<(), AudioError> {
            self.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn initialize_sync(&self) -> Result<(), AudioError> {
            self.initialized_sync.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn play_sound(&self, sound: Sound) {
            self.played.lock().unwrap().push((sound, Instant::now()));
        }
    }

    struct BrokenSink;

    impl SoundSink for BrokenSink {
        fn initialize(&self) -> Result<(), AudioError> {
            Err(AudioError::NoDevice)
        }

        fn initialize_sync(&self) -> Result<(), AudioError> {
            Err(AudioError::NoDevice)
        }

        fn play_sound(&self, _sound: Sound) {}
    }

    fn fast_config() -> SequencerConfig {
        SequencerConfig {
            tempo_range: TempoRange { min: 30, max: 1200 },
            default_tempo: 600,
        }
    }

    fn sequencer(config: SequencerConfig) -> (Sequencer, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let sequencer = Sequencer::new(config, sink.clone());
        (sequencer, sink)
    }

    #[test]
    fn test_step_interval() {
        assert_eq!(step_duration_ms(120), 125.0);
        assert_eq!(step_duration_ms(30), 500.0);
        assert_eq!(step_duration_ms(200), 75.0);
        assert_eq!(step_interval(120), Duration::from_millis(125));
        // same input, same interval
        assert_eq!(step_interval(140), step_interval(140));
    }

    #[test]
    fn test_pattern_ids_are_one_based() {
        let pattern = Pattern::new();
        assert_eq!(pattern.steps()[0].id, 1);
        assert_eq!(pattern.steps()[15].id, 16);
        assert!(pattern.step(0).is_none());
        assert!(pattern.step(17).is_none());
    }

    #[test]
    fn test_assign_toggle_law() {
        let mut state = SequencerState::new(64);

        state.assign(3, Selection::Sound(Sound::Kick));
        assert_eq!(state.pattern.step(3).unwrap().sound, Some(Sound::Kick));

        // same sound toggles off
        state.assign(3, Selection::Sound(Sound::Kick));
        assert_eq!(state.pattern.step(3).unwrap().sound, None);

        // different sound replaces
        state.assign(3, Selection::Sound(Sound::Kick));
        state.assign(3, Selection::Sound(Sound::CowBell));
        assert_eq!(state.pattern.step(3).unwrap().sound, Some(Sound::CowBell));

        // delete always clears
        state.assign(3, Selection::Delete);
        assert_eq!(state.pattern.step(3).unwrap().sound, None);
        state.assign(3, Selection::Delete);
        assert_eq!(state.pattern.step(3).unwrap().sound, None);

        // none is a no-op
        state.assign(4, Selection::Sound(Sound::Snare));
        state.assign(4, Selection::None);
        assert_eq!(state.pattern.step(4).unwrap().sound, Some(Sound::Snare));

        // out of range ids are ignored
        state.assign(0, Selection::Sound(Sound::Snare));
        state.assign(17, Selection::Sound(Sound::Snare));
    }

    #[test]
    fn test_advance_wraps_and_reads_new_step() {
        let mut state = SequencerState::new(64);
        state.pattern.step_mut(2).unwrap().sound = Some(Sound::Snare);

        assert_eq!(state.advance(), (1, Some(Sound::Snare)));
        for _ in 0..14 {
            state.advance();
        }
        assert_eq!(state.current_step, 15);
        assert_eq!(state.advance(), (0, None));
    }

    #[test]
    fn test_pointer_after_n_ticks() {
        for n in [1usize, 5, 16, 17, 40] {
            let mut state = SequencerState::new(64);
            for _ in 0..n {
                state.advance();
            }
            assert_eq!(state.current_step, n % STEPS);
        }
    }

    #[test]
    fn test_update_tempo_clamps() {
        let (mut seq, _) = sequencer(SequencerConfig::default());
        assert_eq!(seq.tempo(), 64);
        seq.update_tempo(500);
        assert_eq!(seq.tempo(), 200);
        seq.update_tempo(1);
        assert_eq!(seq.tempo(), 30);
        seq.update_tempo(140);
        assert_eq!(seq.tempo(), 140);
    }

    #[test]
    fn test_playback_triggers_assigned_steps() {
        let (mut seq, sink) = sequencer(fast_config());
        for id in 1..=16 {
            seq.assign_sound_to_step(id, Selection::Sound(Sound::HiHat));
        }

        seq.toggle_play_pause();
        assert!(seq.state().is_playing);
        assert_eq!(sink.initialized.load(Ordering::SeqCst), 1);
        thread::sleep(Duration::from_millis(230));
        seq.toggle_play_pause();

        let plays = sink.plays();
        assert!(plays.len() >= 3, "only {} ticks", plays.len());
        assert!(plays.iter().all(|(sound, _)| *sound == Sound::HiHat));

        let events = seq.poll_events();
        assert!(events
            .iter()
            .any(|event| matches!(event, PlaybackEvent::StepAdvanced(1))));
    }

    #[test]
    fn test_stop_resets_pointer_and_leaves_no_ghost_ticks() {
        let (mut seq, sink) = sequencer(fast_config());
        seq.assign_sound_to_step(1, Selection::Sound(Sound::Kick));
        for id in 2..=16 {
            seq.assign_sound_to_step(id, Selection::Sound(Sound::Snare));
        }

        seq.toggle_play_pause();
        thread::sleep(Duration::from_millis(120));
        seq.toggle_play_pause();

        let state = seq.state();
        assert!(!state.is_playing);
        assert_eq!(state.current_step, 0);

        let count = sink.plays().len();
        thread::sleep(Duration::from_millis(120));
        assert_eq!(sink.plays().len(), count);
        assert_eq!(seq.current_step(), 0);
    }

    #[test]
    fn test_second_start_does_not_double_tick() {
        let (mut seq, sink) = sequencer(fast_config());
        for id in 1..=16 {
            seq.assign_sound_to_step(id, Selection::Sound(Sound::Kick));
        }

        seq.start();
        seq.start();
        seq.start();
        thread::sleep(Duration::from_millis(200));
        seq.stop();

        // 25ms interval over 200ms: at most 8 ticks from a single task
        let plays = sink.plays();
        assert!(plays.len() <= 9, "{} ticks", plays.len());
        assert_eq!(sink.initialized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tempo_updates_keep_phase() {
        let (mut seq, sink) = sequencer(fast_config());
        for id in 1..=16 {
            seq.assign_sound_to_step(id, Selection::Sound(Sound::Kick));
        }

        seq.toggle_play_pause();
        let started = Instant::now();
        // hammer the same tempo faster than the step interval
        while started.elapsed() < Duration::from_millis(250) {
            seq.update_tempo(600);
            thread::sleep(Duration::from_millis(5));
        }
        seq.toggle_play_pause();

        let plays = sink.plays();
        // restarting from scratch on every update would never tick
        assert!(plays.len() >= 5, "only {} ticks", plays.len());
        for pair in plays.windows(2) {
            let gap = pair[1].1.duration_since(pair[0].1);
            assert!(gap >= Duration::from_millis(10), "double tick, gap {gap:?}");
        }
    }

    #[test]
    fn test_tempo_change_while_running_takes_effect() {
        let (mut seq, sink) = sequencer(fast_config());
        for id in 1..=16 {
            seq.assign_sound_to_step(id, Selection::Sound(Sound::Kick));
        }

        seq.toggle_play_pause();
        thread::sleep(Duration::from_millis(60));
        seq.update_tempo(60);
        assert!(seq.is_playing());
        let before = sink.plays().len();
        // 250ms interval now
        thread::sleep(Duration::from_millis(150));
        let after = sink.plays().len();
        seq.toggle_play_pause();

        assert!(after - before <= 1, "{} ticks after slowing down", after - before);
        assert_eq!(seq.tempo(), 60);
    }

    fn first_play_after(sink: &RecordingSink, at: Instant) -> Option<Instant> {
        sink.plays()
            .into_iter()
            .map(|(_, played)| played)
            .find(|played| *played >= at)
    }

    #[test]
    fn test_speeding_up_keeps_pending_tick_deadline() {
        let config = SequencerConfig {
            default_tempo: 60,
            ..fast_config()
        };
        let (mut seq, sink) = sequencer(config);
        for id in 1..=16 {
            seq.assign_sound_to_step(id, Selection::Sound(Sound::Kick));
        }

        let started = Instant::now();
        seq.toggle_play_pause();
        // first tick is due 250ms after start
        thread::sleep(Duration::from_millis(50));
        seq.update_tempo(1200);

        thread::sleep(Duration::from_millis(150));
        assert!(sink.plays().is_empty(), "pending tick fired early");

        thread::sleep(Duration::from_millis(150));
        seq.toggle_play_pause();

        let first = first_play_after(&sink, started).expect("no tick after speeding up");
        let offset = first.duration_since(started);
        assert!(offset >= Duration::from_millis(245), "first tick at {offset:?}");
        // later ticks run at the new 12.5ms interval
        assert!(sink.plays().len() >= 3, "only {} ticks", sink.plays().len());
    }

    #[test]
    fn test_slowing_down_keeps_pending_tick_deadline() {
        let config = SequencerConfig {
            default_tempo: 1200,
            ..fast_config()
        };
        let (mut seq, sink) = sequencer(config);
        for id in 1..=16 {
            seq.assign_sound_to_step(id, Selection::Sound(Sound::Kick));
        }

        seq.toggle_play_pause();
        thread::sleep(Duration::from_millis(40));
        let changed = Instant::now();
        seq.update_tempo(60);

        // the tick already waiting is due within 12.5ms
        thread::sleep(Duration::from_millis(80));
        let next = first_play_after(&sink, changed).expect("pending tick was pushed back");
        let delay = next.duration_since(changed);
        assert!(delay <= Duration::from_millis(40), "pending tick after {delay:?}");

        // then nothing until the new 250ms interval has passed
        let after_change = sink.plays().iter().filter(|(_, t)| *t >= changed).count();
        seq.toggle_play_pause();
        assert_eq!(after_change, 1);
    }

    #[test]
    fn test_inverted_tempo_range_is_normalized() {
        let config = SequencerConfig {
            tempo_range: TempoRange { min: 200, max: 30 },
            default_tempo: 500,
        };
        let (mut seq, _) = sequencer(config);
        assert_eq!(seq.config().tempo_range, TempoRange { min: 30, max: 200 });
        assert_eq!(seq.tempo(), 200);
        seq.update_tempo(10);
        assert_eq!(seq.tempo(), 30);

        let inverted = TempoRange { min: 200, max: 30 };
        assert_eq!(inverted.clamp(500), 200);
        assert!(inverted.contains(64));
        assert_eq!(TempoRange::new(200, 30), TempoRange::default());
    }

    #[test]
    fn test_edits_during_playback_are_visible() {
        let (mut seq, sink) = sequencer(fast_config());
        seq.toggle_play_pause();
        thread::sleep(Duration::from_millis(60));
        assert!(sink.plays().is_empty());

        for id in 1..=16 {
            seq.assign_sound_to_step(id, Selection::Sound(Sound::CowBell));
        }
        thread::sleep(Duration::from_millis(100));
        seq.toggle_play_pause();
        assert!(!sink.plays().is_empty());
    }

    #[test]
    fn test_preview_initializes_then_plays_once() {
        let (seq, sink) = sequencer(SequencerConfig::default());
        seq.preview_sound(Sound::Cymbal);
        assert_eq!(sink.initialized_sync.load(Ordering::SeqCst), 1);
        let plays = sink.plays();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].0, Sound::Cymbal);
    }

    #[test]
    fn test_failed_audio_keeps_transport_usable() {
        let mut seq = Sequencer::new(fast_config(), Arc::new(BrokenSink));
        seq.preview_sound(Sound::Kick);
        seq.toggle_play_pause();
        assert!(seq.is_playing());
        thread::sleep(Duration::from_millis(60));
        seq.toggle_play_pause();
        assert!(!seq.is_playing());
        assert_eq!(seq.current_step(), 0);
    }

    #[test]
    fn test_click_step_uses_selection() {
        let (mut seq, _) = sequencer(SequencerConfig::default());
        seq.click_step(1);
        assert_eq!(seq.pattern().step(1).unwrap().sound, None);

        seq.set_selection(Selection::Sound(Sound::HandClap));
        seq.click_step(1);
        assert_eq!(seq.pattern().step(1).unwrap().sound, Some(Sound::HandClap));

        seq.set_selection(Selection::Delete);
        seq.click_step(1);
        assert_eq!(seq.pattern().step(1).unwrap().sound, None);
    }

    #[test]
    fn test_load_shared_replaces_pattern_and_tempo() {
        let (mut seq, _) = sequencer(SequencerConfig::default());
        seq.assign_sound_to_step(2, Selection::Sound(Sound::Kick));

        let mut sounds = [None; STEPS];
        sounds[0] = Some(Sound::Snare);
        seq.load_shared(SharedPattern {
            tempo: Some(140),
            pattern: Some(Pattern::from_sounds(sounds)),
        });
        assert_eq!(seq.tempo(), 140);
        assert_eq!(seq.pattern().sounds(), sounds);

        // nothing accepted: defaults kept
        seq.load_shared(SharedPattern::default());
        assert_eq!(seq.tempo(), 140);
        assert_eq!(seq.pattern().sounds(), sounds);
    }
}
