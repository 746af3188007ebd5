/// Synthesis building blocks: oscillators, noise, biquad filters and gain envelopes
///
/// Every node here is one-shot. A voice allocates its own nodes, plays them
/// once, and throws them away.
use rand::Rng;
use std::f32::consts::PI;

/// Floor for exponential automation, which cannot reach or cross zero
const MIN_EXP_VALUE: f32 = 1e-4;

/// Automated parameter: holds `start_value` until `start`, ramps exponentially
/// to `end_value` at `end`, then holds it. Times are in seconds from voice start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    start_value: f32,
    end_value: f32,
    start: f32,
    end: f32,
}

impl Envelope {
    pub fn constant(value: f32) -> Self {
        Self {
            start_value: value,
            end_value: value,
            start: 0.0,
            end: 0.0,
        }
    }

    pub fn exponential(from: f32, to: f32, start: f32, end: f32) -> Self {
        Self {
            start_value: from.max(MIN_EXP_VALUE),
            end_value: to.max(MIN_EXP_VALUE),
            start,
            end: end.max(start),
        }
    }

    pub fn value_at(&self, time: f32) -> f32 {
        if time <= self.start {
            return self.start_value;
        }
        if time >= self.end {
            return self.end_value;
        }
        let progress = (time - self.start) / (self.end - self.start);
        self.start_value * (self.end_value / self.start_value).powf(progress)
    }

    /// Time at which the automation settles
    pub fn end(&self) -> f32 {
        self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
}

impl Waveform {
    /// Sample the waveform at `phase` in [0, 1)
    fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * 2.0 * PI).sin(),
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    frequency: Envelope,
    phase: f32,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f32) -> Self {
        Self::swept(waveform, Envelope::constant(frequency))
    }

    pub fn swept(waveform: Waveform, frequency: Envelope) -> Self {
        Self {
            waveform,
            frequency,
            phase: 0.0,
        }
    }

    fn next_sample(&mut self, time: f32, sample_rate: f32) -> f32 {
        let out = self.waveform.sample(self.phase);
        self.phase = (self.phase + self.frequency.value_at(time) / sample_rate).fract();
        out
    }
}

/// Pre-rendered white noise, played once from the start
#[derive(Debug, Clone)]
pub struct NoiseBuffer {
    data: Vec<f32>,
}

impl NoiseBuffer {
    pub fn white(duration: f32, sample_rate: f32) -> Self {
        let len = (duration * sample_rate).max(0.0).round() as usize;
        let mut rng = rand::thread_rng();
        let data = (0..len).map(|_| rng.gen_range(-1.0_f32..1.0)).collect();
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn sample(&self, index: usize) -> f32 {
        self.data.get(index).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterKind {
    LowPass,
    HighPass,
    BandPass,
    /// Bell boost or cut, `gain_db` at the center frequency
    Peaking { gain_db: f32 },
}

/// Second-order IIR filter using the RBJ audio-EQ cookbook coefficients
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    // Transposed direct form II state
    z1: f32,
    z2: f32,
}

impl Biquad {
    pub const DEFAULT_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

    pub fn new(kind: FilterKind, frequency: f32, q: f32, sample_rate: f32) -> Self {
        let frequency = frequency.clamp(10.0, sample_rate * 0.49);
        let q = q.max(0.01);
        let w0 = 2.0 * PI * frequency / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let (b0, b1, b2, a0, a1, a2) = match kind {
            FilterKind::LowPass => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterKind::HighPass => {
                let b1 = -(1.0 + cos_w0);
                (-b1 / 2.0, b1, -b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterKind::BandPass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            FilterKind::Peaking { gain_db } => {
                let a = 10.0_f32.powf(gain_db / 40.0);
                (
                    1.0 + alpha * a,
                    -2.0 * cos_w0,
                    1.0 - alpha * a,
                    1.0 + alpha / a,
                    -2.0 * cos_w0,
                    1.0 - alpha / a,
                )
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }
}

#[derive(Debug, Clone)]
pub enum Source {
    /// Summed tone generators
    Tones(Vec<Oscillator>),
    Noise(NoiseBuffer),
}

#[derive(Debug, Clone)]
pub enum Stage {
    Filter(Biquad),
    Gain(Envelope),
}

/// A source routed through an ordered list of stages, sounding between
/// `start` and `stop` (sample offsets from voice start)
#[derive(Debug, Clone)]
pub struct Chain {
    source: Source,
    stages: Vec<Stage>,
    start: usize,
    stop: usize,
}

impl Chain {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            stages: Vec::new(),
            start: 0,
            stop: 0,
        }
    }

    pub fn filter(mut self, filter: Biquad) -> Self {
        self.stages.push(Stage::Filter(filter));
        self
    }

    pub fn gain(mut self, envelope: Envelope) -> Self {
        self.stages.push(Stage::Gain(envelope));
        self
    }

    /// Schedule start and stop, in seconds from voice start
    pub fn schedule(mut self, start: f32, stop: f32, sample_rate: f32) -> Self {
        self.start = (start * sample_rate).round() as usize;
        self.stop = (stop.max(start) * sample_rate).round() as usize;
        self
    }

    pub fn stop_sample(&self) -> usize {
        self.stop
    }

    pub fn is_finished(&self, clock: usize) -> bool {
        clock >= self.stop
    }

    pub fn next_sample(&mut self, clock: usize, sample_rate: f32) -> f32 {
        if clock < self.start || clock >= self.stop {
            return 0.0;
        }
        let time = clock as f32 / sample_rate;

        let mut sample = match &mut self.source {
            Source::Tones(tones) => tones
                .iter_mut()
                .map(|tone| tone.next_sample(time, sample_rate))
                .sum(),
            Source::Noise(buffer) => buffer.sample(clock - self.start),
        };

        for stage in &mut self.stages {
            sample = match stage {
                Stage::Filter(filter) => filter.process(sample),
                Stage::Gain(envelope) => sample * envelope.value_at(time),
            };
        }
        sample
    }
}
