/// Turns page HTML into bounded text for oracle prompts.
pub trait PageSummarizer: Send + Sync {
    fn summarize(&self, html: &str) -> String;
}

pub const TRUNCATION_MARKER: &str = "\n... [TRUNCATED]";

/// `html2text` rendering with blank-line runs collapsed, cut at `max_chars`.
pub struct TextSummarizer {
    max_chars: usize,
    width: usize,
}

impl TextSummarizer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            width: 120,
        }
    }
}

impl PageSummarizer for TextSummarizer {
    fn summarize(&self, html: &str) -> String {
        let text = html2text::from_read(html.as_bytes(), self.width)
            .unwrap_or_else(|_| html.to_string());
        truncate(&collapse_blank_lines(&text), self.max_chars)
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = Vec::new();
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push("");
        } else {
            blank_run = 0;
            out.push(line);
        }
    }
    out.join("\n").trim().to_string()
}

/// Cut at `max_chars` characters and append the marker when anything was dropped.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_keeps_text_and_links() {
        let html = r#"<html><head><title>Shop</title></head><body>
            <h1>Widget</h1><p>Price: <span class="price">$42</span></p>
            <a href="/cart">Cart</a></body></html>"#;
        let summary = TextSummarizer::new(10_000).summarize(html);
        assert!(summary.contains("Widget"));
        assert!(summary.contains("$42"));
        assert!(summary.contains("Cart"));
    }

    #[test]
    fn test_truncation_marker() {
        let out = truncate("abcdefghij", 4);
        assert_eq!(out, format!("abcd{}", TRUNCATION_MARKER));
        assert_eq!(truncate("abc", 4), "abc");
    }

    #[test]
    fn test_truncation_is_char_safe() {
        let out = truncate("ééééé", 2);
        assert!(out.starts_with("éé"));
        assert!(out.ends_with("[TRUNCATED]"));
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\nb\n"), "a\n\nb");
    }
}
