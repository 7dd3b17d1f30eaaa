//! 名称规范化与查询分词

use std::sync::OnceLock;

use regex::Regex;

static WORD_RE: OnceLock<Regex> = OnceLock::new();

fn word_re() -> &'static Regex {
    WORD_RE.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("valid regex"))
}

/// 查询里不携带检索信息的词
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "any", "best", "can", "do", "exercise", "exercises", "for", "give", "good",
    "i", "in", "is", "it", "me", "move", "movement", "my", "of", "on", "or", "please", "some",
    "something", "that", "the", "to", "using", "want", "with", "workout",
];

/// 小写、去掉除连字符以外的标点、空白折叠为单个连字符
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if (c == '-' || c.is_whitespace()) && !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// 朴素复数折叠：长度大于 3 且不以 "ss" 结尾的词去掉末尾 s
pub fn fold_token(token: &str) -> String {
    let lower = token.to_lowercase();
    if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") {
        lower[..lower.len() - 1].to_string()
    } else {
        lower
    }
}

/// 切词、折叠复数并去停用词
pub fn tokenize(s: &str) -> Vec<String> {
    let lower = s.to_lowercase();
    word_re()
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| !STOP_WORDS.contains(w))
        .map(fold_token)
        .collect()
}

/// 基于编辑距离的相似度 1 - d / max(len)，对已规范化的字符串计算
pub fn fuzzy_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - strsim::levenshtein(a, b) as f64 / max_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace_and_punctuation() {
        assert_eq!(normalize("  Dumbbell   Row!! "), "dumbbell-row");
        assert_eq!(normalize("Push-up"), "push-up");
        assert_eq!(normalize("push - up"), "push-up");
        assert_eq!(normalize("dumbell-row"), "dumbell-row");
    }

    #[test]
    fn test_fold_token_keeps_short_and_double_s_words() {
        assert_eq!(fold_token("weights"), "weight");
        assert_eq!(fold_token("Press"), "press");
        assert_eq!(fold_token("abs"), "abs");
        assert_eq!(fold_token("lats"), "lat");
    }

    #[test]
    fn test_tokenize_drops_stop_words() {
        assert_eq!(tokenize("chest exercise with weights"), vec!["chest", "weight"]);
    }

    #[test]
    fn test_fuzzy_similarity_decreases_with_distance() {
        let one = fuzzy_similarity("dumbbell-row", "dumbell-row");
        let two = fuzzy_similarity("dumbbell-row", "dumell-row");
        assert!((one - (1.0 - 1.0 / 12.0)).abs() < 1e-9);
        assert!(two < one);
        assert_eq!(fuzzy_similarity("plank", "plank"), 1.0);
    }
}
