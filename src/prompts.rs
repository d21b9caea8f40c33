//! Prompts for turning a lecture slide image into a flashcard.
//!
//! Keeping every prompt here means changing card style touches exactly one
//! file, and tests can inspect the prompts without a live model.
//!
//! Callers can override the system prompt via
//! [`crate::config::PipelineConfig::system_prompt`]; the per-page prompt is
//! always generated by [`page_prompt`].

/// Default system prompt asking for one `{front, back}` card per slide.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert educator who condenses lecture slides into study flashcards.

For every slide image you receive, produce exactly ONE index card:

1. FRONT
   - A single, clear concept, keyword, or question taken from the slide's central theme
   - Keep it brief: one line, no trailing punctuation unless it is a question

2. BACK
   - A highly compressed but complete explanation that answers the front
   - Use Markdown: short bullet lists, **bold** for key terms, $inline$ LaTeX for formulas

3. WHAT TO IGNORE
   - Navigation elements, slide numbers, logos, footers and repeated headers

4. OUTPUT FORMAT
   - Reply with a single JSON object and nothing else:
     {"front": "<string>", "back": "<string>"}
   - Do NOT wrap the JSON in ``` fences
   - Do NOT add commentary before or after the JSON"#;

/// User-turn text sent with the image of `page_num`.
pub fn page_prompt(page_num: usize) -> String {
    format!(
        "Analyze this lecture slide (Page {page_num}) and synthesize an educational index card.\n\
         The 'front' should be a single clear concept or question.\n\
         The 'back' should be a comprehensive but concise explanation.\n\
         Ignore navigational elements or footers."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_demands_json() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains(r#"{"front": "<string>", "back": "<string>"}"#));
    }

    #[test]
    fn page_prompt_names_the_page() {
        assert!(page_prompt(7).contains("(Page 7)"));
    }
}
