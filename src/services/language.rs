//! Language marker detection for broadcast titles
//!
//! Recognizes parenthesized language names ("(Englisch)"), original-version
//! markers ("(OV)", "(OmU)") and inline filename tags ("Title.eng.mkv").

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::text_utils::collapse_whitespace;

/// Language assumed when a title carries no marker.
pub const DEFAULT_LANGUAGE: &str = "deu";

/// Original version whose language is not resolved yet.
pub const UNDETERMINED_LANGUAGE: &str = "und";

/// Markers for original-version broadcasts, compared case-insensitively.
const ORIGINAL_VERSION_MARKERS: &[&str] = &[
    "OV",
    "OmU",
    "OmeU",
    "Originalversion",
    "Originalversion mit Untertitel",
];

static PARENTHESIZED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((?P<content>[^)]*)\)").unwrap());

struct LanguageInfo {
    /// ISO 639-1
    two_letter: &'static str,
    /// ISO 639-2/T
    three_letter: &'static str,
    /// ISO 639-2/B when it differs from the terminology code
    bibliographic: Option<&'static str>,
    /// English, German and native display names
    names: &'static [&'static str],
}

macro_rules! lang {
    ($two:literal, $three:literal, $bib:expr, [$($name:literal),+ $(,)?]) => {
        LanguageInfo {
            two_letter: $two,
            three_letter: $three,
            bibliographic: $bib,
            names: &[$($name),+],
        }
    };
}

static LANGUAGES: &[LanguageInfo] = &[
    lang!("de", "deu", Some("ger"), ["German", "Deutsch"]),
    lang!("en", "eng", None, ["English", "Englisch"]),
    lang!("fr", "fra", Some("fre"), ["French", "Französisch", "Français"]),
    lang!("es", "spa", None, ["Spanish", "Spanisch", "Español"]),
    lang!("it", "ita", None, ["Italian", "Italienisch", "Italiano"]),
    lang!("pt", "por", None, ["Portuguese", "Portugiesisch", "Português"]),
    lang!("nl", "nld", Some("dut"), ["Dutch", "Niederländisch", "Nederlands"]),
    lang!("da", "dan", None, ["Danish", "Dänisch", "Dansk"]),
    lang!("sv", "swe", None, ["Swedish", "Schwedisch", "Svenska"]),
    lang!("no", "nor", None, ["Norwegian", "Norwegisch", "Norsk"]),
    lang!("fi", "fin", None, ["Finnish", "Finnisch", "Suomi"]),
    lang!("is", "isl", Some("ice"), ["Icelandic", "Isländisch", "Íslenska"]),
    lang!("pl", "pol", None, ["Polish", "Polnisch", "Polski"]),
    lang!("cs", "ces", Some("cze"), ["Czech", "Tschechisch", "Čeština"]),
    lang!("sk", "slk", Some("slo"), ["Slovak", "Slowakisch", "Slovenčina"]),
    lang!("sl", "slv", None, ["Slovenian", "Slowenisch", "Slovenščina"]),
    lang!("hu", "hun", None, ["Hungarian", "Ungarisch", "Magyar"]),
    lang!("ro", "ron", Some("rum"), ["Romanian", "Rumänisch", "Română"]),
    lang!("bg", "bul", None, ["Bulgarian", "Bulgarisch", "Български"]),
    lang!("hr", "hrv", None, ["Croatian", "Kroatisch", "Hrvatski"]),
    lang!("sr", "srp", None, ["Serbian", "Serbisch", "Српски"]),
    lang!("bs", "bos", None, ["Bosnian", "Bosnisch", "Bosanski"]),
    lang!("mk", "mkd", Some("mac"), ["Macedonian", "Mazedonisch", "Македонски"]),
    lang!("sq", "sqi", Some("alb"), ["Albanian", "Albanisch", "Shqip"]),
    lang!("el", "ell", Some("gre"), ["Greek", "Griechisch", "Ελληνικά"]),
    lang!("tr", "tur", None, ["Turkish", "Türkisch", "Türkçe"]),
    lang!("ru", "rus", None, ["Russian", "Russisch", "Русский"]),
    lang!("uk", "ukr", None, ["Ukrainian", "Ukrainisch", "Українська"]),
    lang!("be", "bel", None, ["Belarusian", "Belarussisch", "Беларуская"]),
    lang!("lt", "lit", None, ["Lithuanian", "Litauisch", "Lietuvių"]),
    lang!("lv", "lav", None, ["Latvian", "Lettisch", "Latviešu"]),
    lang!("et", "est", None, ["Estonian", "Estnisch", "Eesti"]),
    lang!("ga", "gle", None, ["Irish", "Irisch", "Gaeilge"]),
    lang!("cy", "cym", Some("wel"), ["Welsh", "Walisisch", "Cymraeg"]),
    lang!("eu", "eus", Some("baq"), ["Basque", "Baskisch", "Euskara"]),
    lang!("ca", "cat", None, ["Catalan", "Katalanisch", "Català"]),
    lang!("lb", "ltz", None, ["Luxembourgish", "Luxemburgisch", "Lëtzebuergesch"]),
    lang!("ar", "ara", None, ["Arabic", "Arabisch", "العربية"]),
    lang!("he", "heb", None, ["Hebrew", "Hebräisch", "עברית"]),
    lang!("fa", "fas", Some("per"), ["Persian", "Persisch", "فارسی"]),
    lang!("hi", "hin", None, ["Hindi", "हिन्दी"]),
    lang!("zh", "zho", Some("chi"), ["Chinese", "Chinesisch", "中文"]),
    lang!("ja", "jpn", None, ["Japanese", "Japanisch", "日本語"]),
    lang!("ko", "kor", None, ["Korean", "Koreanisch", "한국어"]),
    lang!("vi", "vie", None, ["Vietnamese", "Vietnamesisch", "Tiếng Việt"]),
    lang!("th", "tha", None, ["Thai", "Thailändisch", "ไทย"]),
    lang!("id", "ind", None, ["Indonesian", "Indonesisch", "Bahasa Indonesia"]),
    lang!("ka", "kat", Some("geo"), ["Georgian", "Georgisch", "ქართული"]),
    lang!("hy", "hye", Some("arm"), ["Armenian", "Armenisch", "Հայերեն"]),
    lang!("la", "lat", None, ["Latin", "Latein", "Latina"]),
];

/// Outcome of language detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageDetectionResult {
    /// Three-letter code, or [`UNDETERMINED_LANGUAGE`] for original versions
    pub language_code: String,
    /// Exact substring that was consumed, if any
    pub matched_identifier: Option<String>,
    /// Title with the marker and its delimiters removed
    pub cleaned_title: String,
}

/// Detects and strips language markers.
#[derive(Debug, Clone, Default)]
pub struct LanguageDetector;

impl LanguageDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect the language marker in `title`, falling back to `default_language`.
    pub fn detect(&self, title: &str, default_language: &str) -> LanguageDetectionResult {
        for caps in PARENTHESIZED.captures_iter(title) {
            let (Some(whole), Some(content)) = (caps.get(0), caps.name("content")) else {
                continue;
            };
            let content = content.as_str().trim();
            if content.is_empty() {
                continue;
            }

            if is_original_version_marker(content) {
                return LanguageDetectionResult {
                    language_code: UNDETERMINED_LANGUAGE.to_string(),
                    matched_identifier: Some(whole.as_str().to_string()),
                    cleaned_title: remove_span(title, whole.start(), whole.end()),
                };
            }

            if let Some(info) = find_by_name(content) {
                return LanguageDetectionResult {
                    language_code: info.three_letter.to_string(),
                    matched_identifier: Some(whole.as_str().to_string()),
                    cleaned_title: remove_span(title, whole.start(), whole.end()),
                };
            }
        }

        if let Some(result) = detect_inline_tag(title) {
            return result;
        }

        LanguageDetectionResult {
            language_code: default_language.to_string(),
            matched_identifier: None,
            cleaned_title: title.to_string(),
        }
    }
}

/// Map a two- or three-letter code to its ISO 639-2/T form.
pub fn normalize_language_code(code: &str) -> Option<&'static str> {
    find_by_code(code).map(|info| info.three_letter)
}

fn is_original_version_marker(content: &str) -> bool {
    ORIGINAL_VERSION_MARKERS
        .iter()
        .any(|marker| marker.eq_ignore_ascii_case(content))
}

fn find_by_name(content: &str) -> Option<&'static LanguageInfo> {
    let lowered = content.to_lowercase();
    LANGUAGES
        .iter()
        .find(|info| info.names.iter().any(|name| name.to_lowercase() == lowered))
}

fn find_by_code(code: &str) -> Option<&'static LanguageInfo> {
    let lowered = code.to_ascii_lowercase();
    match lowered.len() {
        2 => LANGUAGES.iter().find(|info| info.two_letter == lowered),
        3 => LANGUAGES
            .iter()
            .find(|info| info.three_letter == lowered || info.bibliographic == Some(lowered.as_str())),
        _ => None,
    }
}

/// `Title.eng.mkv` style tag: second-to-last dot segment is a language code.
fn detect_inline_tag(title: &str) -> Option<LanguageDetectionResult> {
    let last_dot = title.rfind('.')?;
    if last_dot == 0 {
        return None;
    }

    let extension_len = title[last_dot + 1..].chars().count();
    if extension_len == 0 || extension_len > 5 {
        return None;
    }

    let before_extension = &title[..last_dot];
    let tag_dot = before_extension.rfind('.')?;
    let tag = &before_extension[tag_dot + 1..];
    if !(2..=3).contains(&tag.len()) || !tag.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let info = find_by_code(tag)?;
    let mut cleaned = String::with_capacity(title.len());
    cleaned.push_str(&title[..tag_dot]);
    cleaned.push_str(&title[last_dot..]);

    Some(LanguageDetectionResult {
        language_code: info.three_letter.to_string(),
        matched_identifier: Some(tag.to_string()),
        cleaned_title: cleaned,
    })
}

fn remove_span(text: &str, start: usize, end: usize) -> String {
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..start]);
    out.push_str(&text[end..]);
    collapse_whitespace(&out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn detect(title: &str) -> LanguageDetectionResult {
        LanguageDetector::new().detect(title, DEFAULT_LANGUAGE)
    }

    #[test]
    fn test_original_version_short_circuits() {
        let result = detect("Folge 6: Die Bande (S02/E06) (Originalversion)");
        assert_eq!(result.language_code, "und");
        assert_eq!(result.matched_identifier.as_deref(), Some("(Originalversion)"));
        assert_eq!(result.cleaned_title, "Folge 6: Die Bande (S02/E06)");
    }

    #[test]
    fn test_original_version_case_insensitive() {
        let result = detect("Film (omu) (Englisch)");
        assert_eq!(result.language_code, "und");
        assert_eq!(result.cleaned_title, "Film (Englisch)");
    }

    #[test]
    fn test_german_display_name() {
        let result = detect("Am Limit (S02/E03) (Englisch)");
        assert_eq!(result.language_code, "eng");
        assert_eq!(result.cleaned_title, "Am Limit (S02/E03)");
    }

    #[test]
    fn test_english_and_native_names() {
        assert_eq!(detect("Doku (French)").language_code, "fra");
        assert_eq!(detect("Doku (Français)").language_code, "fra");
        assert_eq!(detect("Doku (türkisch)").language_code, "tur");
    }

    #[test]
    fn test_unrelated_parentheses_are_kept() {
        let result = detect("Alles im Einklang (157)");
        assert_eq!(result.language_code, "deu");
        assert_eq!(result.matched_identifier, None);
        assert_eq!(result.cleaned_title, "Alles im Einklang (157)");
    }

    #[test]
    fn test_empty_parentheses_are_skipped() {
        let result = detect("Leer () (Spanisch)");
        assert_eq!(result.language_code, "spa");
        assert_eq!(result.cleaned_title, "Leer ()");
    }

    #[test]
    fn test_inline_filename_tag() {
        let result = detect("S01E02 - Title.eng.mkv");
        assert_eq!(result.language_code, "eng");
        assert_eq!(result.matched_identifier.as_deref(), Some("eng"));
        assert_eq!(result.cleaned_title, "S01E02 - Title.mkv");

        let two_letter = detect("Title.fr.mka");
        assert_eq!(two_letter.language_code, "fra");
        assert_eq!(two_letter.cleaned_title, "Title.mka");

        let bibliographic = detect("Title.ger.mkv");
        assert_eq!(bibliographic.language_code, "deu");
    }

    #[test]
    fn test_inline_tag_requires_known_code() {
        let result = detect("Title.xyz.mkv");
        assert_eq!(result.language_code, "deu");
        assert_eq!(result.cleaned_title, "Title.xyz.mkv");
    }

    #[test]
    fn test_dates_are_not_inline_tags() {
        let result = detect("Nix für die Katz · 13.06.13 | Folge 1135");
        assert_eq!(result.language_code, "deu");
        assert_eq!(result.matched_identifier, None);
    }

    #[test]
    fn test_custom_default_language() {
        let result = LanguageDetector::new().detect("Plain title", "eng");
        assert_eq!(result.language_code, "eng");
    }

    #[test]
    fn test_cleaned_title_does_not_redetect() {
        for title in [
            "Am Limit (S02/E03) (Englisch)",
            "Die Bande (OV)",
            "Title.eng.mkv",
        ] {
            let first = detect(title);
            let second = detect(&first.cleaned_title);
            assert_eq!(second.matched_identifier, None, "re-detected tag in {title}");
        }
    }

    #[test]
    fn test_code_helpers() {
        assert_eq!(normalize_language_code("EN"), Some("eng"));
        assert_eq!(normalize_language_code("fre"), Some("fra"));
        assert_eq!(normalize_language_code("und"), None);
    }
}
