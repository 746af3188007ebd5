/// drumseq - a 16-step drum sequencer with procedural percussion
///
/// This library provides the core components:
/// - Step scheduling with live tempo changes
/// - Synthesis of six drum voices from oscillators, noise and filters
/// - Output device lifecycle (deferred start, suspend, recover)
/// - Shareable pattern links

pub mod audio;
pub mod sequencer;
pub mod share;

// Re-export commonly used types
pub use audio::{AudioError, DeviceState, EngineConfig, Sound, SoundSink, SynthEngine};
pub use sequencer::playback::PlaybackEvent;
pub use sequencer::{Pattern, Selection, Sequencer, SequencerConfig, SequencerState, Step};
pub use share::{decode_pattern, encode_pattern, parse_query, share_url, SharedPattern};
