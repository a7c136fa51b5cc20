/// Reported when a slide has no text to classify.
pub const UNKNOWN_LANGUAGE: &str = "unknown";
pub const JAPANESE: &str = "ja";
pub const ENGLISH: &str = "en";

const HIRAGANA: std::ops::RangeInclusive<char> = '\u{3040}'..='\u{309F}';
const KATAKANA: std::ops::RangeInclusive<char> = '\u{30A0}'..='\u{30FF}';

/// Kana anywhere in the text means Japanese; everything else, including the
/// empty string, is treated as English.
pub fn detect_language(text: &str) -> &'static str {
    if text.chars().any(is_kana) {
        JAPANESE
    } else {
        ENGLISH
    }
}

/// Japanese slides go to English, English slides to Japanese, and anything
/// unrecognised defaults to English.
pub fn select_target_language(detected: &str) -> &'static str {
    match normalize_code(detected).as_str() {
        JAPANESE => ENGLISH,
        ENGLISH => JAPANESE,
        _ => ENGLISH,
    }
}

/// Targets whose text is laid out on a single line instead of word-wrapped.
pub fn is_cjk(code: &str) -> bool {
    matches!(normalize_code(code).as_str(), "ja" | "zh" | "ko")
}

fn is_kana(ch: char) -> bool {
    HIRAGANA.contains(&ch) || KATAKANA.contains(&ch)
}

fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase()
}
