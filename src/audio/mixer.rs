/// Shared output gain stage
///
/// Every voice is summed here and scaled by the master gain before it reaches
/// the device. Producers push voices; the device callback pulls samples.
use std::collections::VecDeque;

use super::voices::Voice;

pub struct Mixer {
    voices: VecDeque<Voice>,
    master_gain: f32,
    max_voices: usize,
}

impl Mixer {
    pub fn new(master_gain: f32, max_voices: usize) -> Self {
        Self {
            voices: VecDeque::with_capacity(max_voices),
            master_gain: master_gain.clamp(0.0, 1.0),
            max_voices: max_voices.max(1),
        }
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.clamp(0.0, 1.0);
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Add a voice, dropping the oldest when at capacity
    pub fn push(&mut self, voice: Voice) {
        if self.voices.len() >= self.max_voices {
            if let Some(dropped) = self.voices.pop_front() {
                log::debug!("voice limit reached, dropping {}", dropped.sound());
            }
        }
        self.voices.push_back(voice);
    }

    /// Next mono output sample
    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        let sum: f32 = self.voices.iter_mut().map(Voice::next_sample).sum();
        (sum * self.master_gain).clamp(-1.0, 1.0)
    }

    /// Drop voices whose chains have all stopped
    pub fn collect_finished(&mut self) {
        self.voices.retain(|voice| !voice.is_finished());
    }

    /// Fill an interleaved buffer, writing the same sample to every channel
    pub fn render<T: Copy>(&mut self, data: &mut [T], channels: usize, convert: impl Fn(f32) -> T) {
        for frame in data.chunks_mut(channels.max(1)) {
            let sample = convert(self.next_sample());
            for out in frame.iter_mut() {
                *out = sample;
            }
        }
        self.collect_finished();
    }
}
