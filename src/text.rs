//! Text post-processing applied to raw ASR segment output: profanity decensoring and
//! stream-title date stripping.

use std::sync::LazyLock;

use regex::Regex;

/// Case-sensitive censored-form replacements. Each key is matched both as given (intended
/// to be lowercase) and with its first letter capitalized, mirroring how a sentence-leading
/// word would be cased.
const WORD_MAP: &[(&str, &str)] = &[
    ("f**k", "fuck"),
    ("f***ing", "fucking"),
    ("f*****g", "fucking"),
    ("f******", "fucking"),
    ("fuck***t", "fucking bullshit"),
    ("fuck***", "fucking"),
    ("f**ing", "fucking"),
    ("f*****", "fucker"),
    ("f***", "fuck"),
    ("f**", "fuck"),
    ("sh**", "shit"),
    ("s**t", "shit"),
    ("s***", "shit"),
    ("a**", "ass"),
    ("b**ch", "bitch"),
    ("b***h", "bitch"),
    ("c***", "cunt"),
    ("p***y", "pussy"),
    ("d**n", "damn"),
    ("****", "fuck"),
];

/// Rewrite asterisked profanity to its canonical form.
///
/// Replacement is case-sensitive and tries both the all-lowercase and capitalized form of
/// each key, so `"f**k"` and `"F**k"` both resolve, but `"F**K"` does not.
pub fn decensor(text: &str) -> String {
    let mut out = text.to_owned();
    for (old, new) in WORD_MAP {
        out = out.replace(old, new);
        out = out.replace(&capitalize(old), &capitalize(new));
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b|\b(\d{2}/\d{2}/\d{4})\b|\b(\d{2}:\d{2})\b")
        .expect("date pattern is a valid regex")
});

/// Strip an embedded date or time token (`YYYY-MM-DD`, `MM/DD/YYYY`, or `HH:MM`) from a
/// stream title, then trim the result. Only the matched token is removed; any double space
/// it leaves behind in the middle of the string is intentionally left alone, matching the
/// upstream probe's behavior.
pub fn strip_date(title: &str) -> String {
    DATE_PATTERN.replace_all(title, "").trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decensor_lowercase() {
        assert_eq!(decensor("f**k"), "fuck");
    }

    #[test]
    fn decensor_capitalized() {
        assert_eq!(decensor("F**k"), "Fuck");
    }

    #[test]
    fn decensor_mid_sentence() {
        assert_eq!(decensor("sh** happens"), "shit happens");
    }

    #[test]
    fn decensor_is_a_fixed_point() {
        let once = decensor("f**k this sh** F**k");
        let twice = decensor(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn decensor_leaves_clean_text_untouched() {
        assert_eq!(decensor("hello world"), "hello world");
    }

    #[test]
    fn strip_date_iso() {
        assert_eq!(strip_date("Stream 2023-01-01 Title"), "Stream  Title");
    }

    #[test]
    fn strip_date_time_token() {
        assert_eq!(strip_date("Morning show 08:30 edition"), "Morning show  edition");
    }

    #[test]
    fn strip_date_no_match_is_unchanged() {
        assert_eq!(strip_date("Just a title"), "Just a title");
    }
}
