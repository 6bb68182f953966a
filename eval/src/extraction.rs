//! Dataset-aware answer extraction.
//!
//! Canonicalizes free-text predictions into integer labels. Benchmark formats
//! are heterogeneous: multiple choice uses 1-based indices or A-D letters,
//! prostate grading (the `panda` benchmark) reports an ISUP grade inside a
//! JSON object, open VQA is scored on the first integer.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d+)\b").unwrap());
static LETTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b([A-Da-d])\b").unwrap());

/// Benchmark using the ISUP-grade JSON convention.
const PROSTATE_BENCHMARK: &str = "panda";

const ISUP_MIN: i64 = 0;
const ISUP_MAX: i64 = 5;

/// Letter extraction applies only to 4-option questions (A-D).
const LETTER_OPTION_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAnswer {
    pub label: Option<i64>,
    pub raw: String,
}

/// Extract a canonical integer label from a model prediction.
pub fn extract_label(
    prediction: &str,
    benchmark_name: &str,
    options: Option<&[String]>,
) -> ExtractedAnswer {
    let text = prediction.trim();

    // Prostate grading never falls back to integer scanning: a stray "3" in
    // prose is a coordinate or a Gleason pattern far more often than a grade.
    if benchmark_name == PROSTATE_BENCHMARK {
        return ExtractedAnswer {
            label: extract_isup_grade(text),
            raw: text.to_string(),
        };
    }

    let label = match options {
        Some(options) if !options.is_empty() => extract_from_options(text, options),
        _ => first_integer(text),
    };

    ExtractedAnswer {
        label,
        raw: text.to_string(),
    }
}

/// ISUP grade from the first JSON object carrying an `isup_grade` key:
/// integer 0-5 is the grade, `null` means benign (0), anything else is an
/// extraction failure.
fn extract_isup_grade(text: &str) -> Option<i64> {
    let obj = find_json_object_with_key(text, "isup_grade")?;
    match &obj["isup_grade"] {
        Value::Null => Some(0),
        Value::Number(n) => n
            .as_i64()
            .filter(|grade| (ISUP_MIN..=ISUP_MAX).contains(grade)),
        _ => None,
    }
}

fn extract_from_options(text: &str, options: &[String]) -> Option<i64> {
    // Letter match only when the convention is unambiguous (exactly A-D).
    if options.len() == LETTER_OPTION_COUNT
        && let Some(m) = LETTER_RE.captures(text)
    {
        let letter = m[1].to_ascii_uppercase().chars().next().unwrap();
        return Some(i64::from(letter as u8 - b'A') + 1);
    }

    // First in-range 1-based integer.
    for m in INT_RE.captures_iter(text) {
        if let Ok(k) = m[1].parse::<i64>()
            && k >= 1
            && k <= options.len() as i64
        {
            return Some(k);
        }
    }

    // Option text match, longest first so "heart" wins over "art".
    let lowered = text.to_lowercase();
    let mut indexed: Vec<(usize, &String)> = options.iter().enumerate().collect();
    indexed.sort_by_key(|(_, opt)| std::cmp::Reverse(opt.len()));
    for (i, opt) in indexed {
        if !opt.is_empty() && lowered.contains(&opt.to_lowercase()) {
            return Some(i as i64 + 1);
        }
    }

    None
}

fn first_integer(text: &str) -> Option<i64> {
    INT_RE
        .captures(text)
        .and_then(|m| m[1].parse::<i64>().ok())
}

/// Scan for balanced top-level JSON objects and return the first one that
/// parses and contains `key`. Braces inside string literals are skipped.
fn find_json_object_with_key(text: &str, key: &str) -> Option<Value> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        match balanced_object_end(&text[start..]) {
            Some(len) => {
                let candidate = &text[start..start + len];
                if let Ok(value) = serde_json::from_str::<Value>(candidate)
                    && value.get(key).is_some()
                {
                    return Some(value);
                }
                search_from = start + 1;
            }
            None => return None,
        }
    }
    None
}

/// Length of the balanced object starting at the first byte of `text`
/// (which must be `{`), or `None` if it never closes.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, b) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prostate_null_grade_is_benign() {
        let answer = extract_label(r#"{"isup_grade": null}"#, "panda", None);
        assert_eq!(answer.label, Some(0));
    }

    #[test]
    fn test_prostate_valid_grades() {
        for grade in 0..=5 {
            let text = format!(r#"The grading follows. {{"isup_grade": {grade}}}"#);
            assert_eq!(extract_label(&text, "panda", None).label, Some(grade));
        }
    }

    #[test]
    fn test_prostate_out_of_range_grade_fails() {
        assert_eq!(extract_label(r#"{"isup_grade": 6}"#, "panda", None).label, None);
        assert_eq!(
            extract_label(r#"{"isup_grade": "high"}"#, "panda", None).label,
            None
        );
    }

    #[test]
    fn test_prostate_never_falls_back_to_integers() {
        assert_eq!(extract_label("grade is 3", "panda", None).label, None);
        assert_eq!(
            extract_label(r#"{"note": "x"} grade 3"#, "panda", None).label,
            None
        );
    }

    #[test]
    fn test_prostate_skips_objects_without_key() {
        let text = r#"{"summary": "prostate core"} then {"isup_grade": 4}"#;
        assert_eq!(extract_label(text, "panda", None).label, Some(4));
    }

    #[test]
    fn test_letter_match_on_four_options() {
        let options = opts(&["lung", "breast", "colon", "skin"]);
        let answer = extract_label("The answer is C.", "tcga", Some(&options));
        assert_eq!(answer.label, Some(3));
    }

    #[test]
    fn test_integer_match_when_not_four_options() {
        let options = opts(&["a", "b", "c", "d", "e"]);
        assert_eq!(
            extract_label("Option 4 fits best", "gtex", Some(&options)).label,
            Some(4)
        );
        // Out-of-range integers are skipped in favor of in-range ones.
        assert_eq!(
            extract_label("With 90% confidence I pick 2", "gtex", Some(&options)).label,
            Some(2)
        );
    }

    #[test]
    fn test_substring_match_longest_first() {
        let options = opts(&["art", "heart"]);
        let answer = extract_label("this looks like heart tissue", "gtex", Some(&options));
        assert_eq!(answer.label, Some(2));
    }

    #[test]
    fn test_substring_match_case_insensitive() {
        let options = opts(&["Kidney", "Liver", "Spleen"]);
        assert_eq!(
            extract_label("most likely LIVER", "gtex", Some(&options)).label,
            Some(2)
        );
    }

    #[test]
    fn test_open_vqa_first_integer() {
        assert_eq!(extract_label("I count 12 mitoses", "tcga_expert_vqa", None).label, Some(12));
        assert_eq!(extract_label("no integers here", "tcga_expert_vqa", None).label, None);
    }

    #[test]
    fn test_no_match_returns_none_with_raw() {
        let options = opts(&["alpha", "beta", "gamma", "delta"]);
        let answer = extract_label("uncertain", "tcga", Some(&options));
        assert_eq!(answer.label, None);
        assert_eq!(answer.raw, "uncertain");
    }

    #[test]
    fn test_json_with_braces_in_strings() {
        let text = r#"{"isup_grade": 2, "note": "pattern {4+3} absent"}"#;
        assert_eq!(extract_label(text, "panda", None).label, Some(2));
    }
}
