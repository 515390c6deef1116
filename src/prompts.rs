//! Prompt text for the structured-Markdown contract.
//!
//! Every AI backend sends the same instruction body; only the transport and
//! the provider-native "answer in JSON" switch differ. Keeping the text here
//! means a prompt change is one edit, and tests can inspect the rendered
//! prompt without a live backend.

/// System message sent ahead of the prompt by chat-style backends.
pub const SYSTEM_MESSAGE: &str =
    "You are a helpful document processing assistant designed to output JSON.";

/// Instruction template. `{subject}`, `{file_type}` and `{text_content}` are
/// substituted by [`render_prompt`]; every other brace is literal.
pub const STRUCTURED_MARKDOWN_PROMPT: &str = r#"You are an expert-level document processing AI. Your task is to convert raw, potentially messy text extracted from a file into a clean, well-structured Markdown document. You must also identify and report any issues you encounter during the conversion.

**CRITICAL INSTRUCTION: Your final output must be a single, valid JSON object. Do not output any text before or after the JSON object.**

The JSON object must have the following structure:
{
  "markdown_content": "...",
  "warnings": []
}

**Field Explanations:**
1.  `markdown_content` (string): This field must contain the fully converted, high-quality Markdown text.
2.  `warnings` (array of strings): This field is for reporting problems. If you encounter any issues like complex tables you cannot convert, unrecoverable garbled text, or missing figures you have to describe, you MUST add a descriptive string for each issue into this array. If there are no issues, return an empty array `[]`.

**Conversion Rules for `markdown_content`:**
- **Headings:** Use `#`, `##`, `###` for titles and subtitles.
- **Lists:** Convert numbered and bulleted lists to proper Markdown lists.
- **Formatting:** Use `**bold**` and `*italics*` where appropriate.
- **Formulas:** All mathematical formulas MUST be in LaTeX format. Inline formulas use `$E=mc^2$`, and block formulas use `$$...$$`.
- **Code Blocks:** Use triple backticks (```) for code, specifying the language if possible.
- **Tables:** Recreate simple tables using Markdown table syntax. For very complex tables, do not attempt to create them; instead, add a warning to the `warnings` array explaining the issue and describe the table's content in the text.
- **Placeholders:** For fill-in-the-blanks, use `____`. For judgment questions, use `( )`.
- **Readability:** Ensure proper spacing and newlines between paragraphs, questions, and sections.

**Self-Correction:** Before finalizing your JSON output, review the `markdown_content`. Ensure all LaTeX is valid, lists are formatted correctly, and the structure is logical.

---
**Document Context:**
- Subject: "{subject}"
- Original File Type: "{file_type}"

**Raw Text Content to Process:**
---
{text_content}
---

Now, process the text and provide your response in the specified JSON format."#;

/// Fill the template in a single pass.
///
/// Substituted values are never rescanned, so extracted text that happens to
/// contain `{subject}` is passed through untouched.
pub fn render_prompt(subject: &str, file_type: &str, text_content: &str) -> String {
    let mut out =
        String::with_capacity(STRUCTURED_MARKDOWN_PROMPT.len() + subject.len() + text_content.len());
    let mut rest = STRUCTURED_MARKDOWN_PROMPT;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let hit = [
            ("{subject}", subject),
            ("{file_type}", file_type),
            ("{text_content}", text_content),
        ]
        .into_iter()
        .find(|(placeholder, _)| tail.starts_with(placeholder));

        match hit {
            Some((placeholder, value)) => {
                out.push_str(value);
                rest = &tail[placeholder.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
