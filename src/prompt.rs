//! Prompt construction: word-safe text truncation and prompt templates.

use crate::{
    async_utils::io::read_to_string,
    prelude::*,
    toml_utils::{from_toml_str, render_deser_error},
};

/// Our built-in prompt templates, selected with `--prompt-id`.
pub const BUILTIN_TEMPLATES: &[&str] = &[
    "Generate a scanned document image with following text:",
    "Create a mockup of a scanned document containing the text:",
    "Design a sample document scan with the following text:",
    "Generate an image of printed note that include this text:",
    "Produce an image of a typed document page with the following text:",
    "Generate a document scan visualization showing this text:",
    "Produce a sample of how a scanned memo might look with this text:",
    "Generate an image of a plain Word document with black text on white background without decorative elements, document should contain this text:",
];

/// Cut `text` down to at most `length` characters without splitting a word.
///
/// We take the first `length` characters, and then cut again at the last
/// whitespace character in that slice. If the slice contains no whitespace
/// (one very long token), it is returned as is. If `text` is shorter than
/// `length`, it is returned unchanged and we log a warning, because the
/// caller asked for more text than we have.
///
/// Lengths are measured in characters, not bytes.
pub fn prepare_text(text: &str, length: usize) -> &str {
    let char_count = text.chars().count();
    if char_count < length {
        warn!(
            text_length = char_count,
            requested_length = length,
            "Text is shorter than requested length, using all of it"
        );
        return text;
    }

    // Byte offset of the end of the first `length` characters.
    let slice_end = text
        .char_indices()
        .nth(length)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let slice = &text[..slice_end];

    match slice.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
        Some((idx, _)) => &slice[..idx],
        None => slice,
    }
}

/// Join a template and a text slice into a full prompt.
pub fn build_prompt(template: &str, text: &str) -> String {
    format!("{template} {text}")
}

/// A set of prompt templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    /// Our templates, indexed by prompt ID.
    pub templates: Vec<String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            templates: BUILTIN_TEMPLATES.iter().map(|&t| t.to_owned()).collect(),
        }
    }
}

impl PromptTemplates {
    /// Load templates from a TOML file of the form `templates = ["...", ...]`.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let data = read_to_string(path).await?;
        Self::from_toml(&data)
            .with_context(|| format!("Failed to parse prompt templates from {path:?}"))
    }

    /// Parse templates from a TOML string.
    pub fn from_toml(data: &str) -> Result<Self> {
        let templates = from_toml_str::<Self>(data)
            .map_err(|err| anyhow!("{}", render_deser_error(&err)))?;
        if templates.templates.is_empty() {
            return Err(anyhow!("No prompt templates found"));
        }
        Ok(templates)
    }

    /// Load templates from `path` if we have one, or use our built-ins.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path).await,
            None => Ok(Self::default()),
        }
    }

    /// Look up a template by prompt ID, falling back to the first template if
    /// the ID is out of range.
    pub fn select(&self, prompt_id: usize) -> &str {
        match self.templates.get(prompt_id) {
            Some(template) => template,
            None => {
                warn!(
                    prompt_id,
                    available = self.templates.len(),
                    "Invalid prompt ID, using prompt 0"
                );
                &self.templates[0]
            }
        }
    }
}

impl<'de> toml_span::Deserialize<'de> for PromptTemplates {
    fn deserialize(
        value: &mut toml_span::Value<'de>,
    ) -> Result<Self, toml_span::DeserError> {
        let mut th = toml_span::de_helpers::TableHelper::new(value)?;
        let templates = th.required::<Vec<String>>("templates")?;
        th.finalize(None)?;
        Ok(Self { templates })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuts_at_last_space() {
        assert_eq!(prepare_text("The quick brown fox jumps", 10), "The quick");
    }

    #[test]
    fn short_text_is_unchanged() {
        let text = "short text";
        assert_eq!(prepare_text(text, 1000), text);
        assert_eq!(prepare_text("", 5), "");
    }

    #[test]
    fn single_long_token_is_returned_raw() {
        assert_eq!(prepare_text("abcdefghijklmnop", 5), "abcde");
    }

    #[test]
    fn exact_length_still_cuts_at_whitespace() {
        assert_eq!(prepare_text("one two", 7), "one");
    }

    #[test]
    fn other_whitespace_counts() {
        assert_eq!(prepare_text("line one\nline two", 12), "line one");
        assert_eq!(prepare_text("tab\tseparated words", 14), "tab\tseparated");
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "存在主义 是一个哲学的 非理性主义思潮";
        assert_eq!(prepare_text(text, 8), "存在主义");
        assert_eq!(prepare_text("存在主义是一个哲学", 4), "存在主义");
    }

    #[test]
    fn never_exceeds_length_or_splits_words() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do \
                    eiusmod tempor incididunt ut labore et dolore magna aliqua.";
        let chars = text.chars().collect::<Vec<_>>();
        for length in 6..=chars.len() {
            let out = prepare_text(text, length);
            let out_len = out.chars().count();
            assert!(out_len <= length, "length {length}: {out:?}");
            assert!(text.starts_with(out));
            // The character right after the cut must be whitespace.
            assert!(
                chars[out_len].is_whitespace(),
                "length {length} split a word: {out:?}"
            );
        }
    }

    #[test]
    fn builds_prompt() {
        let templates = PromptTemplates::default();
        assert_eq!(templates.templates.len(), 8);
        assert_eq!(
            build_prompt(templates.select(0), "Hello"),
            "Generate a scanned document image with following text: Hello"
        );
    }

    #[test]
    fn invalid_prompt_id_falls_back_to_first() {
        let templates = PromptTemplates::default();
        assert_eq!(templates.select(99), BUILTIN_TEMPLATES[0]);
        assert_eq!(templates.select(7), BUILTIN_TEMPLATES[7]);
    }

    #[test]
    fn parses_templates_from_toml() {
        let templates = PromptTemplates::from_toml(
            r#"templates = ["First template:", "Second template:"]"#,
        )
        .unwrap();
        assert_eq!(templates.templates, vec!["First template:", "Second template:"]);
    }

    #[test]
    fn rejects_bad_template_files() {
        assert!(PromptTemplates::from_toml("templates = []").is_err());
        assert!(PromptTemplates::from_toml("prompts = [\"x\"]").is_err());
        assert!(PromptTemplates::from_toml("templates = \"x\"").is_err());
    }
}
