/// The six percussion sounds and the recipes that synthesize them
use std::fmt;
use std::str::FromStr;

use super::nodes::{Biquad, Chain, Envelope, FilterKind, NoiseBuffer, Oscillator, Source, Waveform};
use super::AudioError;

/// Decay target shared by every envelope
const SILENT: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sound {
    Kick,
    Snare,
    HiHat,
    Cymbal,
    HandClap,
    CowBell,
}

impl Sound {
    pub const ALL: [Sound; 6] = [
        Sound::Kick,
        Sound::Snare,
        Sound::HiHat,
        Sound::Cymbal,
        Sound::HandClap,
        Sound::CowBell,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Sound::Kick => "kick",
            Sound::Snare => "snare",
            Sound::HiHat => "hihat",
            Sound::Cymbal => "cymbal",
            Sound::HandClap => "handclap",
            Sound::CowBell => "cowbell",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Sound::Kick => "Kick",
            Sound::Snare => "Snare",
            Sound::HiHat => "Hi-Hat",
            Sound::Cymbal => "Cymbal",
            Sound::HandClap => "Hand Clap",
            Sound::CowBell => "Cow Bell",
        }
    }
}

impl fmt::Display for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sound: {0}")]
pub struct UnknownSound(pub String);

impl FromStr for Sound {
    type Err = UnknownSound;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sound::ALL
            .into_iter()
            .find(|sound| sound.name() == s)
            .ok_or_else(|| UnknownSound(s.to_string()))
    }
}

/// One triggered sound: a set of chains sharing a sample clock
#[derive(Debug, Clone)]
pub struct Voice {
    sound: Sound,
    chains: Vec<Chain>,
    clock: usize,
    sample_rate: f32,
}

impl Voice {
    /// Allocate fresh nodes for `sound` at the given sample rate
    pub fn build(sound: Sound, sample_rate: f32) -> Result<Self, AudioError> {
        if !sample_rate.is_finite() || sample_rate < 8_000.0 {
            return Err(AudioError::InvalidSampleRate(sample_rate));
        }

        let chains = match sound {
            Sound::Kick => kick(sample_rate),
            Sound::Snare => snare(sample_rate),
            Sound::HiHat => hihat(sample_rate),
            Sound::Cymbal => cymbal(sample_rate),
            Sound::HandClap => handclap(sample_rate),
            Sound::CowBell => cowbell(sample_rate),
        };

        Ok(Self {
            sound,
            chains,
            clock: 0,
            sample_rate,
        })
    }

    pub fn sound(&self) -> Sound {
        self.sound
    }

    /// Length in samples until the last chain stops
    pub fn duration_samples(&self) -> usize {
        self.chains.iter().map(Chain::stop_sample).max().unwrap_or(0)
    }

    pub fn is_finished(&self) -> bool {
        self.chains.iter().all(|chain| chain.is_finished(self.clock))
    }

    pub fn next_sample(&mut self) -> f32 {
        let clock = self.clock;
        let sample_rate = self.sample_rate;
        let out = self
            .chains
            .iter_mut()
            .map(|chain| chain.next_sample(clock, sample_rate))
            .sum();
        self.clock += 1;
        out
    }
}

fn decay(peak: f32, start: f32, length: f32) -> Envelope {
    Envelope::exponential(peak, SILENT, start, start + length)
}

fn kick(sr: f32) -> Vec<Chain> {
    let tone = Oscillator::swept(Waveform::Sine, Envelope::exponential(80.0, 0.01, 0.0, 0.3));
    vec![Chain::new(Source::Tones(vec![tone]))
        .filter(Biquad::new(FilterKind::LowPass, 150.0, Biquad::DEFAULT_Q, sr))
        .gain(decay(1.5, 0.0, 0.3))
        .schedule(0.0, 0.3, sr)]
}

fn snare(sr: f32) -> Vec<Chain> {
    let body = Chain::new(Source::Tones(vec![Oscillator::new(Waveform::Triangle, 200.0)]))
        .gain(decay(0.7, 0.0, 0.2))
        .schedule(0.0, 0.2, sr);
    let rattle = Chain::new(Source::Noise(NoiseBuffer::white(0.1, sr)))
        .filter(Biquad::new(FilterKind::HighPass, 1000.0, Biquad::DEFAULT_Q, sr))
        .gain(decay(0.5, 0.0, 0.1))
        .schedule(0.0, 0.1, sr);
    vec![body, rattle]
}

fn hihat(sr: f32) -> Vec<Chain> {
    vec![Chain::new(Source::Noise(NoiseBuffer::white(0.05, sr)))
        .filter(Biquad::new(FilterKind::HighPass, 7000.0, Biquad::DEFAULT_Q, sr))
        .gain(decay(0.3, 0.0, 0.05))
        .schedule(0.0, 0.05, sr)]
}

fn cymbal(sr: f32) -> Vec<Chain> {
    vec![Chain::new(Source::Noise(NoiseBuffer::white(0.6, sr)))
        .filter(Biquad::new(FilterKind::HighPass, 4500.0, Biquad::DEFAULT_Q, sr))
        .filter(Biquad::new(FilterKind::Peaking { gain_db: 6.0 }, 8000.0, 2.0, sr))
        .gain(decay(0.12, 0.0, 0.6))
        .schedule(0.0, 0.6, sr)]
}

fn handclap(sr: f32) -> Vec<Chain> {
    const BURSTS: usize = 3;
    const SPACING: f32 = 0.01;
    const LENGTH: f32 = 0.05;

    (0..BURSTS)
        .map(|i| {
            let start = i as f32 * SPACING;
            let center = 1000.0 + i as f32 * 500.0;
            Chain::new(Source::Noise(NoiseBuffer::white(LENGTH, sr)))
                .filter(Biquad::new(FilterKind::BandPass, center, 5.0, sr))
                .gain(decay(0.4, start, LENGTH))
                .schedule(start, start + LENGTH, sr)
        })
        .collect()
}

fn cowbell(sr: f32) -> Vec<Chain> {
    let tones = vec![
        Oscillator::new(Waveform::Square, 800.0),
        Oscillator::new(Waveform::Square, 540.0),
    ];
    vec![Chain::new(Source::Tones(tones))
        .gain(decay(0.3, 0.0, 0.3))
        .filter(Biquad::new(FilterKind::BandPass, 800.0, 10.0, sr))
        .schedule(0.0, 0.3, sr)]
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44_100.0;

    fn render(sound: Sound) -> Vec<f32> {
        let mut voice = Voice::build(sound, SR).unwrap();
        let mut out = Vec::new();
        while !voice.is_finished() {
            out.push(voice.next_sample());
        }
        out
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    #[test]
    fn test_sound_names_round_trip() {
        for sound in Sound::ALL {
            assert_eq!(sound.name().parse::<Sound>().unwrap(), sound);
            assert_eq!(sound.to_string(), sound.name());
        }
        assert!("tambourine".parse::<Sound>().is_err());
    }

    #[test]
    fn test_voice_durations_follow_envelopes() {
        let secs = |sound: Sound| Voice::build(sound, SR).unwrap().duration_samples() as f32 / SR;
        assert!((secs(Sound::Kick) - 0.3).abs() < 1e-3);
        assert!((secs(Sound::Snare) - 0.2).abs() < 1e-3);
        assert!((secs(Sound::HiHat) - 0.05).abs() < 1e-3);
        assert!((secs(Sound::Cymbal) - 0.6).abs() < 1e-3);
        assert!((secs(Sound::HandClap) - 0.07).abs() < 1e-3);
        assert!((secs(Sound::CowBell) - 0.3).abs() < 1e-3);
    }

    #[test]
    fn test_every_voice_terminates_and_makes_sound() {
        for sound in Sound::ALL {
            let samples = render(sound);
            assert!(!samples.is_empty(), "{sound} rendered nothing");
            assert!(peak(&samples) > 0.001, "{sound} is silent");
            assert!(samples.iter().all(|s| s.is_finite()), "{sound} blew up");
        }
    }

    #[test]
    fn test_cymbal_quieter_than_hihat_at_onset() {
        // Compare envelope peaks rather than noisy output
        assert!(decay(0.12, 0.0, 0.6).value_at(0.0) < decay(0.3, 0.0, 0.05).value_at(0.0));
    }

    #[test]
    fn test_handclap_bursts_are_staggered() {
        let voice = Voice::build(Sound::HandClap, SR).unwrap();
        assert_eq!(voice.chains.len(), 3);
        let stops: Vec<usize> = voice.chains.iter().map(|c| c.stop_sample()).collect();
        assert!(stops.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_rejects_bad_sample_rate() {
        assert!(matches!(
            Voice::build(Sound::Kick, 0.0),
            Err(AudioError::InvalidSampleRate(_))
        ));
        assert!(Voice::build(Sound::Kick, f32::NAN).is_err());
    }
}
