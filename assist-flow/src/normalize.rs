//! Conservative repair of JSON-ish model output.
//!
//! Rules run once each, in a fixed order:
//!
//! 1. strip Markdown code fences around the payload
//! 2. collapse raw newlines / carriage returns / tabs inside string literals
//! 3. drop commas directly before `}` or `]`
//! 4. collapse runs of commas into one
//! 5. close unbalanced `{` at the end of the text
//!
//! Rules 3 and 4 never touch the contents of string literals. After one pass
//! none of the patterns remain, so `normalize(normalize(x)) == normalize(x)`.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:```(?i:json)?\s*)+").expect("Invalid regex"));

static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\s*```)+$").expect("Invalid regex"));

/// A complete double-quoted string literal, escapes included.
const STRING_LITERAL: &str = r#""(?s:[^"\\]|\\.)*""#;

static STRING_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(STRING_LITERAL).expect("Invalid regex"));

static RAW_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n\t]+").expect("Invalid regex"));

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"({STRING_LITERAL})|(?:,\s*)+([}}\]])")).expect("Invalid regex")
});

static DUPLICATE_COMMA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"({STRING_LITERAL})|,(?:\s*,)+")).expect("Invalid regex")
});

/// Apply every repair rule once.
pub fn normalize(text: &str) -> String {
    let text = strip_code_fences(text);
    let text = collapse_string_whitespace(&text);
    let text = remove_trailing_commas(&text);
    let text = collapse_duplicate_commas(&text);
    close_braces(&text)
}

pub fn strip_code_fences(text: &str) -> String {
    let text = LEADING_FENCE.replace(text.trim(), "");
    let text = TRAILING_FENCE.replace(&text, "");
    text.trim().to_string()
}

pub fn collapse_string_whitespace(text: &str) -> String {
    STRING_SPAN
        .replace_all(text, |caps: &Captures| {
            RAW_WHITESPACE.replace_all(&caps[0], " ").into_owned()
        })
        .into_owned()
}

pub fn remove_trailing_commas(text: &str) -> String {
    TRAILING_COMMA
        .replace_all(text, |caps: &Captures| match caps.get(1) {
            Some(literal) => literal.as_str().to_string(),
            None => caps[2].to_string(),
        })
        .into_owned()
}

pub fn collapse_duplicate_commas(text: &str) -> String {
    DUPLICATE_COMMA
        .replace_all(text, |caps: &Captures| match caps.get(1) {
            Some(literal) => literal.as_str().to_string(),
            None => ",".to_string(),
        })
        .into_owned()
}

/// Append `}` for every unmatched `{`. Braces are counted over the whole
/// text, string contents included.
pub fn close_braces(text: &str) -> String {
    let opens = text.chars().filter(|c| *c == '{').count();
    let closes = text.chars().filter(|c| *c == '}').count();
    if opens <= closes {
        return text.to_string();
    }

    let mut repaired = text
        .trim_end_matches(|c: char| c == ',' || c.is_whitespace())
        .to_string();
    repaired.push_str(&"}".repeat(opens - closes));
    repaired
}
