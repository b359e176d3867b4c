//! Title parser for broadcast archive entries
//!
//! Turns human-written titles into structured episode metadata:
//! - "Am Limit (S02/E03) (Englisch)"
//! - "Folge 168: Lehrer sind auch nur Menschen (S11/E04)"
//! - "Nix für die Katz · 13.06.13 | Folge 1135"
//! - "34. Ungewohnte Zaubertricks (Hörfassung)"
//!
//! Each step works on a [`TitleState`] and hands the remaining text to the next
//! one. Pattern families are tried in a fixed order and the first match wins.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::language::{DEFAULT_LANGUAGE, LanguageDetector, UNDETERMINED_LANGUAGE, normalize_language_code};
use super::text_utils::{collapse_whitespace, strip_prefix_ignore_case};

/// Structured metadata for one broadcast item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTitle {
    /// Cleaned display title
    pub title: String,
    /// Topic context the title was parsed against
    pub topic: Option<String>,
    /// Set together with `episode_number` or not at all
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub absolute_episode_number: Option<u32>,
    /// "Staffel N" without an episode
    pub standalone_season: Option<u32>,
    /// Three-letter code, "und" for unresolved original versions
    pub language: String,
    pub is_show: bool,
    pub has_audio_description: bool,
    pub has_sign_language: bool,
    pub is_trailer: bool,
    pub is_interview: bool,
    /// False when nothing structural was recognized
    pub is_parsed: bool,
}

impl ParsedTitle {
    pub fn has_season_episode(&self) -> bool {
        self.season_number.is_some() && self.episode_number.is_some()
    }

    pub fn has_absolute_numbering(&self) -> bool {
        self.absolute_episode_number.is_some()
    }

    /// Season from either a season/episode pair or a standalone marker.
    pub fn season(&self) -> Option<u32> {
        self.season_number.or(self.standalone_season)
    }

    pub fn is_extra(&self) -> bool {
        self.is_interview || self.is_trailer || !self.is_show
    }

    /// Replace an unresolved original-version language with `language`.
    /// Known two-letter and bibliographic codes are stored in their 639-2/T form.
    ///
    /// This is the only mutation a parsed title goes through.
    pub fn with_language_override(mut self, language: Option<&str>) -> Self {
        if let Some(language) = language.map(str::trim).filter(|l| !l.is_empty()) {
            if self.language == UNDETERMINED_LANGUAGE {
                self.language = normalize_language_code(language)
                    .map(str::to_string)
                    .unwrap_or_else(|| language.to_ascii_lowercase());
            }
        }
        self
    }
}

/// Remaining text plus every span consumed so far.
#[derive(Debug, Clone, Default)]
struct TitleState {
    text: String,
    consumed: Vec<String>,
}

impl TitleState {
    fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            consumed: Vec::new(),
        }
    }

    /// Remove `start..end` together with surrounding whitespace and a
    /// bracket pair enclosing it.
    fn consume(&self, start: usize, end: usize) -> Self {
        let text = self.text.as_str();
        let matched = &text[start..end];
        let trimmed = matched.trim();

        let mut left = skip_whitespace_back(text, start);
        let mut right = skip_whitespace_forward(text, end);

        let opens_before = text[..left].ends_with(['(', '[']);
        let closes_after = text[right..].starts_with([')', ']']);
        let match_opens = trimmed.starts_with(['(', '[']);
        let match_closes = trimmed.ends_with([')', ']']);

        if (opens_before && closes_after) || (opens_before && match_closes) {
            left = skip_whitespace_back(text, left - 1);
        }
        if (opens_before && closes_after) || (match_opens && closes_after) {
            right = skip_whitespace_forward(text, right + 1);
        }

        let mut remaining = String::with_capacity(text.len());
        remaining.push_str(&text[..left]);
        remaining.push(' ');
        remaining.push_str(&text[right..]);

        let mut consumed = self.consumed.clone();
        consumed.push(trimmed.to_string());

        Self {
            text: collapse_whitespace(&remaining),
            consumed,
        }
    }

    fn with_text(&self, text: String) -> Self {
        Self {
            text,
            consumed: self.consumed.clone(),
        }
    }
}

fn skip_whitespace_back(text: &str, mut idx: usize) -> usize {
    while let Some(c) = text[..idx].chars().next_back() {
        if !c.is_whitespace() {
            break;
        }
        idx -= c.len_utf8();
    }
    idx
}

fn skip_whitespace_forward(text: &str, mut idx: usize) -> usize {
    while let Some(c) = text[idx..].chars().next() {
        if !c.is_whitespace() {
            break;
        }
        idx += c.len_utf8();
    }
    idx
}

/// One entry of an ordered pattern cascade
struct TitlePattern {
    family: &'static str,
    regex: Regex,
}

impl TitlePattern {
    fn new(family: &'static str, pattern: &str) -> Self {
        Self {
            family,
            regex: Regex::new(pattern).unwrap(),
        }
    }
}

static AUDIO_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(AD|Audiodeskription|Audio Description|Hörfassung)\b").unwrap()
});

static SIGN_LANGUAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(GS|DGS|Gebärdensprache|Gebärdendolmetscher|Sign Language)\b").unwrap()
});

static SEASON_EPISODE_PATTERNS: Lazy<Vec<TitlePattern>> = Lazy::new(|| {
    vec![
        // S01E05, S01 E05, S03_E01, Staffel 1 Episode 5
        TitlePattern::new(
            "prefixed",
            r"(?i)(?:s|staffel)[\s_]*(?P<season>\d+)[\s_]*(?:e|episode|/)[\s_]*(?P<episode>\d+)",
        ),
        // 1x05
        TitlePattern::new("cross", r"(?P<season>\d+)\s*[xX]\s*(?P<episode>\d+)"),
        // (S01/05), [1e5]
        TitlePattern::new(
            "bracketed",
            r"(?i)[\(\[]s?\s*(?P<season>\d+)\s*(?:e|/)\s*(?P<episode>\d+)[\)\]]",
        ),
        // (Staffel 1, Folge 5)
        TitlePattern::new(
            "german",
            r"(?i)\s*[\(\[]?Staffel\s*(?P<season>\d+),\s*Folge\s*(?P<episode>\d+)[\)\]]?",
        ),
        // (S02/E06), S1 Episode 5
        TitlePattern::new(
            "slashed",
            r"(?i)\s*[\(\[]?S(?P<season>\d+)(?:[\s/]*E|Episode\s*)(?P<episode>\d+)[\)\]]?",
        ),
    ]
});

static ABSOLUTE_PATTERNS: Lazy<Vec<TitlePattern>> = Lazy::new(|| {
    vec![
        TitlePattern::new("folge", r"(?i)Folge\s*(?P<absolute>\d+)\b"),
        TitlePattern::new("parenthesized", r"\(\s*(?P<absolute>\d+)\s*\)"),
        TitlePattern::new("leading", r"^\s*(?P<absolute>\d+)\.\s*"),
        // "098 - Titel", the padded form written for absolute episodes
        TitlePattern::new("padded", r"^\s*(?P<absolute>\d{3})\s+-\s+"),
    ]
});

static SEASON_ONLY_PATTERNS: Lazy<Vec<TitlePattern>> = Lazy::new(|| {
    vec![
        TitlePattern::new("staffel", r"(?i)(?:^|\s)Staffel\s*(?P<season>\d+)\b"),
        TitlePattern::new("season", r"(?i)(?:^|\s)Season\s*(?P<season>\d+)\b"),
        TitlePattern::new("bracketed", r"(?i)[\(\[]S(?P<season>\d+)[\)\]]"),
    ]
});

static TRAILER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bTrailer\b)|^(?:Darum geht's)|(?:Darum geht's)$").unwrap()
});

static INTERVIEW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bInterview\b").unwrap());

static UA_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^u\.a\.\s*").unwrap());

static BROADCAST_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*[·|\-]\s*\d{2}\.\d{2}\.\d{2,4}\s*[·|\-]?\s*").unwrap()
});

static FOLGE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(?:Folge\s*\d+:\s*)").unwrap());

static EDGE_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s\-:–]+|[\s\-:–]+$").unwrap());

const TOPIC_SEPARATORS: &[char] = &[' ', '\t', ':', '_', '-'];

fn capture_number(caps: &Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name)?.as_str().parse().ok()
}

/// First pattern (in order) that matches and yields parseable numbers.
fn first_match<'p, T>(
    patterns: &'p [TitlePattern],
    text: &str,
    extract: impl Fn(&Captures<'_>) -> Option<T>,
) -> Option<(&'p TitlePattern, T, usize, usize)> {
    patterns.iter().find_map(|pattern| {
        let caps = pattern.regex.captures(text)?;
        let value = extract(&caps)?;
        let whole = caps.get(0)?;
        Some((pattern, value, whole.start(), whole.end()))
    })
}

/// Parses broadcast titles into [`ParsedTitle`].
///
/// Stateless apart from its configuration, so a single instance can be shared
/// across concurrent subscription runs.
#[derive(Debug, Clone)]
pub struct TitleParser {
    detector: LanguageDetector,
    default_language: String,
}

impl Default for TitleParser {
    fn default() -> Self {
        Self::new(DEFAULT_LANGUAGE)
    }
}

impl TitleParser {
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            detector: LanguageDetector::new(),
            default_language: default_language.into(),
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Parse a catalog title. Never fails.
    pub fn parse(&self, topic: Option<&str>, raw_title: &str) -> ParsedTitle {
        let detection = self.detector.detect(raw_title, &self.default_language);
        let mut state = TitleState::new(detection.cleaned_title);
        if let Some(identifier) = detection.matched_identifier {
            state.consumed.push(identifier);
        }
        self.parse_state(topic, raw_title, detection.language_code, state)
    }

    /// Parse a file name on disk.
    ///
    /// Language detection sees the full name so inline tags such as
    /// `Title.eng.mka` are found; everything after it works on the stem.
    pub fn parse_file_name(&self, topic: Option<&str>, file_name: &str) -> ParsedTitle {
        let detection = self.detector.detect(file_name, &self.default_language);
        let stem = file_stem(&detection.cleaned_title);
        let raw_stem = file_stem(file_name);

        let mut state = TitleState::new(stem);
        if let Some(identifier) = detection.matched_identifier {
            state.consumed.push(identifier);
        }
        self.parse_state(topic, &raw_stem, detection.language_code, state)
    }

    fn parse_state(
        &self,
        topic: Option<&str>,
        raw_title: &str,
        language: String,
        state: TitleState,
    ) -> ParsedTitle {
        let (has_audio_description, state) = strip_flag(&AUDIO_DESCRIPTION, state);
        let (has_sign_language, state) = strip_flag(&SIGN_LANGUAGE, state);

        let (season_episode, state) = match first_match(&SEASON_EPISODE_PATTERNS, &state.text, |caps| {
            Some((capture_number(caps, "season")?, capture_number(caps, "episode")?))
        }) {
            Some((pattern, numbers, start, end)) => {
                trace!(family = pattern.family, "Matched season/episode pattern");
                (Some(numbers), state.consume(start, end))
            }
            None => (None, state),
        };

        let (absolute, state) = if season_episode.is_none() {
            match first_match(&ABSOLUTE_PATTERNS, &state.text, |caps| capture_number(caps, "absolute")) {
                Some((pattern, number, start, end)) => {
                    trace!(family = pattern.family, "Matched absolute numbering pattern");
                    (Some(number), state.consume(start, end))
                }
                None => (None, state),
            }
        } else {
            (None, state)
        };

        let is_trailer = TRAILER.is_match(&state.text);
        let is_interview = INTERVIEW.is_match(&state.text);

        let (standalone_season, state) = if season_episode.is_none() {
            match first_match(&SEASON_ONLY_PATTERNS, &state.text, |caps| capture_number(caps, "season")) {
                Some((_, season, start, end)) => (Some(season), state.consume(start, end)),
                None => (None, state),
            }
        } else {
            (None, state)
        };

        let state = strip_topic(topic, state);
        let state = cleanup(state);

        let title = if state.text.is_empty() {
            raw_title.to_string()
        } else {
            state.text
        };

        let is_show = season_episode.is_some() || absolute.is_some() || standalone_season.is_some();
        let is_parsed = !state.consumed.is_empty() || is_trailer || is_interview;

        ParsedTitle {
            title,
            topic: topic.map(str::to_string),
            season_number: season_episode.map(|(season, _)| season),
            episode_number: season_episode.map(|(_, episode)| episode),
            absolute_episode_number: absolute,
            standalone_season,
            language,
            is_show,
            has_audio_description,
            has_sign_language,
            is_trailer,
            is_interview,
            is_parsed,
        }
    }
}

fn strip_flag(regex: &Regex, state: TitleState) -> (bool, TitleState) {
    match regex.find(&state.text) {
        Some(m) => {
            let next = state.consume(m.start(), m.end());
            (true, next)
        }
        None => (false, state),
    }
}

fn strip_topic(topic: Option<&str>, state: TitleState) -> TitleState {
    let Some(topic) = topic.map(str::trim).filter(|t| !t.is_empty()) else {
        return state;
    };

    match strip_prefix_ignore_case(&state.text, topic) {
        Some(rest) => {
            let rest = rest.trim_start_matches(TOPIC_SEPARATORS).to_string();
            let mut next = state.with_text(rest);
            next.consumed.push(topic.to_string());
            next
        }
        None => state,
    }
}

fn cleanup(state: TitleState) -> TitleState {
    let text = UA_PREFIX.replace(&state.text, "").trim().to_string();
    let text = BROADCAST_DATE.replace_all(&text, " ").trim().to_string();
    let text = FOLGE_PREFIX.replace(&text, "").to_string();
    let text = replace_separators(&text);
    let text = EDGE_SEPARATORS.replace_all(&text, "").to_string();
    state.with_text(collapse_whitespace(&text))
}

/// Underscores and periods become spaces. Periods touching a digit stay.
fn replace_separators(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    chars
        .iter()
        .enumerate()
        .map(|(i, &c)| match c {
            '_' => ' ',
            '.' => {
                let prev_digit = i > 0 && chars[i - 1].is_ascii_digit();
                let next_digit = chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
                if prev_digit || next_digit { '.' } else { ' ' }
            }
            other => other,
        })
        .collect()
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}
