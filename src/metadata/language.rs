//! cld3 言語コードと表示名の対応表。
//!
//! `-Latn` のようなローマ字表記の派生コードは元の言語に畳み込む。

use std::collections::HashMap;

use once_cell::sync::Lazy;

pub const UNKNOWN: &str = "UNKNOWN";
pub const OTHER_LANGUAGE: &str = "Other_language";

const CLD3_LANGUAGES: &[(&str, &str)] = &[
    ("af", "Afrikaans"),
    ("am", "Amharic"),
    ("ar", "Arabic"),
    ("az", "Azerbaijani"),
    ("be", "Belarusian"),
    ("bg", "Bulgarian"),
    ("bn", "Bangla"),
    ("bs", "Bosnian"),
    ("ca", "Catalan"),
    ("ceb", "Cebuano"),
    ("co", "Corsican"),
    ("cs", "Czech"),
    ("cy", "Welsh"),
    ("da", "Danish"),
    ("de", "German"),
    ("el", "Greek"),
    ("en", "English"),
    ("eo", "Esperanto"),
    ("es", "Spanish"),
    ("et", "Estonian"),
    ("eu", "Basque"),
    ("fa", "Persian"),
    ("fi", "Finnish"),
    ("fil", "Filipino"),
    ("fr", "French"),
    ("fy", "Western Frisian"),
    ("ga", "Irish"),
    ("gd", "Scottish Gaelic"),
    ("gl", "Galician"),
    ("gu", "Gujarati"),
    ("ha", "Hausa"),
    ("haw", "Hawaiian"),
    ("hi", "Hindi"),
    ("hmn", "Hmong"),
    ("hr", "Croatian"),
    ("ht", "Haitian Creole"),
    ("hu", "Hungarian"),
    ("hy", "Armenian"),
    ("id", "Indonesian"),
    ("ig", "Igbo"),
    ("is", "Icelandic"),
    ("it", "Italian"),
    ("iw", "Hebrew"),
    ("ja", "Japanese"),
    ("jv", "Javanese"),
    ("ka", "Georgian"),
    ("kk", "Kazakh"),
    ("km", "Khmer"),
    ("kn", "Kannada"),
    ("ko", "Korean"),
    ("ku", "Kurdish"),
    ("ky", "Kyrgyz"),
    ("la", "Latin"),
    ("lb", "Luxembourgish"),
    ("lo", "Lao"),
    ("lt", "Lithuanian"),
    ("lv", "Latvian"),
    ("mg", "Malagasy"),
    ("mi", "Maori"),
    ("mk", "Macedonian"),
    ("ml", "Malayalam"),
    ("mn", "Mongolian"),
    ("mr", "Marathi"),
    ("ms", "Malay"),
    ("mt", "Maltese"),
    ("my", "Burmese"),
    ("ne", "Nepali"),
    ("nl", "Dutch"),
    ("no", "Norwegian"),
    ("ny", "Nyanja"),
    ("pa", "Punjabi"),
    ("pl", "Polish"),
    ("ps", "Pashto"),
    ("pt", "Portuguese"),
    ("ro", "Romanian"),
    ("ru", "Russian"),
    ("sd", "Sindhi"),
    ("si", "Sinhala"),
    ("sk", "Slovak"),
    ("sl", "Slovenian"),
    ("sm", "Samoan"),
    ("sn", "Shona"),
    ("so", "Somali"),
    ("sq", "Albanian"),
    ("sr", "Serbian"),
    ("st", "Southern Sotho"),
    ("su", "Sundanese"),
    ("sv", "Swedish"),
    ("sw", "Swahili"),
    ("ta", "Tamil"),
    ("te", "Telugu"),
    ("tg", "Tajik"),
    ("th", "Thai"),
    ("tr", "Turkish"),
    ("uk", "Ukrainian"),
    ("ur", "Urdu"),
    ("uz", "Uzbek"),
    ("vi", "Vietnamese"),
    ("xh", "Xhosa"),
    ("yi", "Yiddish"),
    ("yo", "Yoruba"),
    ("zh", "Chinese"),
    ("zu", "Zulu"),
];

/// Languages covered by the multilingual sentence encoder.
const USE_MULTILINGUAL: &[&str] = &[
    "Arabic",
    "Chinese",
    "Dutch",
    "English",
    "French",
    "German",
    "Italian",
    "Japanese",
    "Korean",
    "Polish",
    "Portuguese",
    "Russian",
    "Spanish",
    "Thai",
    "Turkish",
];

static LANGUAGE_NAMES: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| CLD3_LANGUAGES.iter().copied().collect());

/// Maps a cld3 code to its language bucket.
///
/// Missing codes and `und` map to [`UNKNOWN`]; codes outside the table map
/// to [`OTHER_LANGUAGE`].
#[must_use]
pub fn language_name(code: Option<&str>) -> &'static str {
    let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
        return UNKNOWN;
    };
    if code.eq_ignore_ascii_case("und") || code.eq_ignore_ascii_case(UNKNOWN) {
        return UNKNOWN;
    }
    let lowered = code.to_ascii_lowercase();
    let base = lowered.strip_suffix("-latn").unwrap_or(&lowered);
    // zh-cn, zh-tw のような地域付きコード
    let base = base.split(['-', '_']).next().unwrap_or(base);
    LANGUAGE_NAMES.get(base).copied().unwrap_or(OTHER_LANGUAGE)
}

/// Whether `language` is one the multilingual encoder was trained on.
#[must_use]
pub fn in_use_multilingual(language: &str) -> bool {
    USE_MULTILINGUAL.contains(&language)
}

/// Buckets that never rank as a secondary language.
#[must_use]
pub fn is_placeholder(language: &str) -> bool {
    language == UNKNOWN || language == OTHER_LANGUAGE
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("zh"), "Chinese")]
    #[case(Some("zh-Latn"), "Chinese")]
    #[case(Some("ja-Latn"), "Japanese")]
    #[case(Some("pt"), "Portuguese")]
    #[case(Some("und"), UNKNOWN)]
    #[case(None, UNKNOWN)]
    #[case(Some("tlh"), OTHER_LANGUAGE)]
    fn maps_codes_to_buckets(#[case] code: Option<&str>, #[case] expected: &str) {
        assert_eq!(language_name(code), expected);
    }

    #[test]
    fn multilingual_coverage_uses_language_names() {
        assert!(in_use_multilingual("German"));
        assert!(!in_use_multilingual("Tagalog"));
        assert!(is_placeholder(OTHER_LANGUAGE));
    }
}
