/// Playback task - a fixed-period ticking thread that advances the step pointer
use std::io;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::SequencerState;
use crate::audio::{Sound, SoundSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    StepAdvanced(usize),
    Triggered(Sound),
}

/// The one active ticking task. Cancelling joins the thread, so no tick can
/// fire once `cancel` returns.
pub(crate) struct TickTask {
    stop: Sender<()>,
    handle: JoinHandle<Instant>,
    first_tick: Instant,
}

impl TickTask {
    /// Start ticking every `interval`, first at `first_tick`
    pub(crate) fn spawn(
        interval: Duration,
        first_tick: Instant,
        state: Arc<Mutex<SequencerState>>,
        sink: Arc<dyn SoundSink>,
        events: SyncSender<PlaybackEvent>,
    ) -> io::Result<Self> {
        let (stop, stop_rx) = channel();

        let handle = thread::Builder::new()
            .name("drumseq-ticker".to_string())
            .spawn(move || {
                let mut deadline = first_tick;

                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            tick(&state, sink.as_ref(), &events);

                            deadline += interval;
                            let now = Instant::now();
                            if deadline <= now {
                                // Fell behind; skip the backlog instead of bursting
                                deadline = now + interval;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                deadline
            })?;

        Ok(Self {
            stop,
            handle,
            first_tick,
        })
    }

    /// Stop the task and return the deadline of the tick it was waiting on.
    /// The deadline may already be in the past.
    pub(crate) fn cancel(self) -> Instant {
        let _ = self.stop.send(());
        match self.handle.join() {
            Ok(pending) => pending,
            Err(_) => {
                log::error!("ticker thread panicked");
                self.first_tick.max(Instant::now())
            }
        }
    }
}

/// Advance one step and trigger its sound. The state lock is released before
/// the sink is called.
pub(crate) fn tick(
    state: &Mutex<SequencerState>,
    sink: &dyn SoundSink,
    events: &SyncSender<PlaybackEvent>,
) {
    let advanced = {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_playing {
            Some(state.advance())
        } else {
            None
        }
    };

    let Some((step, sound)) = advanced else {
        return;
    };
    log::trace!("tick {step}");

    if let Some(sound) = sound {
        sink.play_sound(sound);
        let _ = events.try_send(PlaybackEvent::Triggered(sound));
    }
    let _ = events.try_send(PlaybackEvent::StepAdvanced(step));
}
