/// Shareable pattern links
///
/// A pattern travels as 16 base-7 digits, one per step: `0` is empty and
/// `1..=6` are kick, snare, hihat, cymbal, handclap and cowbell. Tempo travels
/// as a decimal BPM. Both ride in the query string as `t` and `p`.
use url::{form_urlencoded, Url};

use crate::audio::Sound;
use crate::sequencer::{Pattern, TempoRange, STEPS};

pub const TEMPO_KEY: &str = "t";
pub const PATTERN_KEY: &str = "p";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,

    #[error("pattern has {0} steps, at most 16 allowed")]
    TooLong(usize),

    #[error("invalid step digit {0:?}")]
    InvalidDigit(char),
}

/// Whatever a share link carried that passed validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedPattern {
    pub tempo: Option<u32>,
    pub pattern: Option<Pattern>,
}

pub fn sound_digit(sound: Option<Sound>) -> char {
    match sound {
        None => '0',
        Some(Sound::Kick) => '1',
        Some(Sound::Snare) => '2',
        Some(Sound::HiHat) => '3',
        Some(Sound::Cymbal) => '4',
        Some(Sound::HandClap) => '5',
        Some(Sound::CowBell) => '6',
    }
}

pub fn digit_sound(digit: char) -> Result<Option<Sound>, PatternError> {
    match digit {
        '0' => Ok(None),
        '1'..='6' => {
            let index = digit as usize - '1' as usize;
            Ok(Some(Sound::ALL[index]))
        }
        other => Err(PatternError::InvalidDigit(other)),
    }
}

pub fn encode_pattern(pattern: &Pattern) -> String {
    pattern
        .steps()
        .iter()
        .map(|step| sound_digit(step.sound))
        .collect()
}

/// Decode 1 to 16 digits; missing trailing steps are empty
pub fn decode_pattern(encoded: &str) -> Result<Pattern, PatternError> {
    let len = encoded.chars().count();
    if len == 0 {
        return Err(PatternError::Empty);
    }
    if len > STEPS {
        return Err(PatternError::TooLong(len));
    }

    let mut sounds = [None; STEPS];
    for (slot, digit) in sounds.iter_mut().zip(encoded.chars()) {
        *slot = digit_sound(digit)?;
    }
    Ok(Pattern::from_sounds(sounds))
}

/// Read `t`/`tempo` and `p`/`pattern` from a full URL or a bare query string.
/// Invalid values are dropped.
pub fn parse_query(input: &str, tempo_range: TempoRange) -> SharedPattern {
    let pairs: Vec<(String, String)> = match Url::parse(input) {
        Ok(url) => url.query_pairs().into_owned().collect(),
        Err(_) => form_urlencoded::parse(input.trim_start_matches('?').as_bytes())
            .into_owned()
            .collect(),
    };

    let mut shared = SharedPattern::default();
    for (key, value) in pairs {
        match key.as_str() {
            "t" | "tempo" => match value.parse::<u32>() {
                Ok(tempo) if tempo_range.contains(tempo) => shared.tempo = Some(tempo),
                _ => log::debug!("ignoring shared tempo {value:?}"),
            },
            "p" | "pattern" => match decode_pattern(&value) {
                Ok(pattern) => shared.pattern = Some(pattern),
                Err(e) => log::debug!("ignoring shared pattern {value:?}: {e}"),
            },
            _ => {}
        }
    }
    shared
}

pub fn to_query(tempo: u32, pattern: &Pattern) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair(TEMPO_KEY, &tempo.to_string())
        .append_pair(PATTERN_KEY, &encode_pattern(pattern))
        .finish()
}

/// Share link for `base`, replacing any query it already has
pub fn share_url(base: &str, tempo: u32, pattern: &Pattern) -> Result<String, url::ParseError> {
    let mut url = Url::parse(base)?;
    url.set_query(Some(&to_query(tempo, pattern)));
    url.set_fragment(None);
    Ok(url.into())
}
