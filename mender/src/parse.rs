//! Extraction of fenced code blocks and `##`-titled sections from free-form
//! generation output.
//!
//! Backends may return text without a clearly delimited block; by contract
//! the whole text is then treated as the payload, never as an error.

use std::sync::LazyLock;

use regex::Regex;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    // tag (word after the opening fence), then the body up to the closing fence
    Regex::new(r"(?s)```([A-Za-z0-9+#]*)[^\n]*\n(.*?)```").expect("fence pattern should be valid")
});

/// Extract the first fenced code block matching `lang` (or any block when
/// `lang` is empty or no tagged block matches). Falls back to the whole text.
pub fn extract_code(text: &str, lang: &str) -> String {
    let lang = lang.to_lowercase();
    let mut first_any: Option<String> = None;
    for caps in FENCE.captures_iter(text) {
        let tag = caps.get(1).map_or("", |m| m.as_str()).to_lowercase();
        let body = caps.get(2).map_or("", |m| m.as_str());
        if first_any.is_none() {
            first_any = Some(body.to_string());
        }
        if lang.is_empty() || tag == lang || tag.is_empty() {
            return body.to_string();
        }
    }
    match first_any {
        Some(body) => body,
        None => text.trim().to_string(),
    }
}

/// Split text into `(title, body)` sections delimited by `##` heading lines.
///
/// Content before the first heading is returned under an empty title. Titles
/// are stripped of surrounding quotes, matching the loose formatting
/// generation backends produce.
pub fn split_sections(text: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut title = String::new();
    let mut body = String::new();
    for line in text.lines() {
        if let Some(heading) = line.strip_prefix("##") {
            if !title.is_empty() || !body.trim().is_empty() {
                sections.push((title.clone(), body.trim().to_string()));
            }
            title = heading.trim_start_matches('#').trim().replace('"', "");
            body = String::new();
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    if !title.is_empty() || !body.trim().is_empty() {
        sections.push((title, body.trim().to_string()));
    }
    sections
}

/// Extract the code block under the section whose title contains `section`.
///
/// Returns `None` when the section is missing, so callers can keep their
/// previous value instead of overwriting it with unrelated text.
pub fn extract_section_code(text: &str, section: &str, lang: &str) -> Option<String> {
    let body = split_sections(text)
        .into_iter()
        .find(|(title, _)| title.contains(section))
        .map(|(_, body)| body)?;
    if body.trim().is_empty() {
        return None;
    }
    Some(extract_code(&body, lang))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tagged_block() {
        let text = "intro\n```python\nprint(1)\n```\noutro";
        assert_eq!(extract_code(text, "python"), "print(1)\n");
    }

    #[test]
    fn prefers_matching_tag_over_earlier_block() {
        let text = "```text\nnope\n```\n```python\nyes = 1\n```";
        assert_eq!(extract_code(text, "python"), "yes = 1\n");
    }

    #[test]
    fn untagged_block_matches_any_lang() {
        let text = "```\nbody\n```";
        assert_eq!(extract_code(text, "python"), "body\n");
    }

    #[test]
    fn whole_text_is_payload_without_fences() {
        let text = "  just code, no fences  ";
        assert_eq!(extract_code(text, "python"), "just code, no fences");
    }

    #[test]
    fn splits_quoted_section_titles() {
        let text = "## \"Code\"\n```python\na = 1\n```\n## Test\n```python\nassert a == 1\n```\n";
        let sections = split_sections(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].0, "Code");
        assert_eq!(sections[1].0, "Test");
    }

    #[test]
    fn section_code_extraction_round_trip() {
        let text = "preamble\n## Code\n```python\ndef f():\n    return 1\n```\n## Test\n```python\nassert f() == 1\n```\n";
        let code = extract_section_code(text, "Code", "python").expect("code");
        assert!(code.contains("def f()"));
        let tests = extract_section_code(text, "Test", "python").expect("tests");
        assert!(tests.contains("assert f() == 1"));
    }

    #[test]
    fn missing_section_returns_none() {
        assert!(extract_section_code("no sections here", "Code", "python").is_none());
        assert!(extract_section_code("## Code\n\n## Test\nx\n", "Code", "python").is_none());
    }
}
