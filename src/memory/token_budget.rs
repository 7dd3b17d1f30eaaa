//! 上下文预算
//!
//! getContextForAI 输出是滑动窗口而非完整记录：最多 window_messages 条最近消息，
//! 每条截断到 max_message_chars，整体再截断到 max_chars 个字符。

use crate::config::AppSection;

/// 字符级预算（按 char 计数，保证截断落在字符边界上）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub window_messages: usize,
    pub max_message_chars: usize,
    pub max_chars: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::from(&AppSection::default())
    }
}

impl From<&AppSection> for ContextBudget {
    fn from(section: &AppSection) -> Self {
        Self {
            window_messages: section.context_window_messages,
            max_message_chars: section.max_message_chars,
            max_chars: section.max_context_chars,
        }
    }
}

/// 截断到 max 个字符，超出时以 "…" 结尾（结果长度不超过 max）
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max - 1).collect();
    out.push('…');
    out
}

/// 按段落优先级拼接：前面的段落先占预算，放不下的段落被截断，之后的段落丢弃
pub fn assemble(sections: &[String], max_chars: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for section in sections.iter().filter(|s| !s.is_empty()) {
        let sep = if out.is_empty() { 0 } else { 1 };
        let len = section.chars().count();
        if used + sep + len <= max_chars {
            if sep == 1 {
                out.push('\n');
            }
            out.push_str(section);
            used += sep + len;
        } else {
            let room = max_chars.saturating_sub(used + sep);
            if room > 0 {
                if sep == 1 {
                    out.push('\n');
                }
                out.push_str(&truncate_chars(section, room));
            }
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("squat", 10), "squat");
        let cut = truncate_chars("深蹲深蹲深蹲", 4);
        assert_eq!(cut.chars().count(), 4);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_assemble_never_exceeds_budget() {
        let sections = vec!["a".repeat(30), "b".repeat(30), "c".repeat(30)];
        let out = assemble(&sections, 50);
        assert_eq!(out.chars().count(), 50);
        assert!(out.starts_with(&"a".repeat(30)));
        assert!(!out.contains('c'));
    }
}
