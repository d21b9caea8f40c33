//! Post-processing: deterministic cleanup of model replies and card text.
//!
//! Even when asked for bare JSON, vision models regularly wrap the object in
//! ` ```json ` fences, add a sentence of preamble, use `\r\n`, or sprinkle
//! zero-width characters through the text. Cleaning happens in two passes:
//!
//! 1. [`clean_model_reply`] turns the raw reply into something
//!    `serde_json` can parse (fences stripped, object extracted).
//! 2. [`clean_card_text`] tidies the `front` / `back` strings that end up in
//!    the job record and the exported notes.

use once_cell::sync::Lazy;
use regex::Regex;

/// Reduce a raw model reply to the JSON object it contains.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Strip outer code fences (` ```json `, ` ```markdown `, bare ` ``` `)
/// 4. Cut everything before the first `{` and after the last `}`
///
/// Returns an empty string when nothing is left, which callers treat as an
/// empty response.
pub fn clean_model_reply(raw: &str) -> String {
    let s = normalise_line_endings(raw);
    let s = remove_invisible_chars(&s);
    let s = strip_code_fences(&s);
    extract_json_object(&s).trim().to_string()
}

/// Tidy one side of a flashcard.
///
/// Rules (applied in order):
/// 1. Normalise line endings
/// 2. Strip invisible Unicode
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 1
/// 5. Replace hallucinated image links with their alt text
/// 6. Trim leading/trailing blank space
pub fn clean_card_text(text: &str) -> String {
    let s = normalise_line_endings(text);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_hallucinated_images(&s);
    s.trim().to_string()
}

// ── Fences ───────────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\n(.*)\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── JSON extraction ──────────────────────────────────────────────────────────

fn extract_json_object(input: &str) -> &str {
    match (input.find('{'), input.rfind('}')) {
        (Some(start), Some(end)) if start < end => &input[start..=end],
        _ => input,
    }
}

// ── Whitespace ───────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Hallucinated images ──────────────────────────────────────────────────────
//
// A card cannot carry images, so any `![alt](url)` the model invents for a
// figure on the slide is reduced to its alt text in italics. Real absolute
// links are kept.

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    if !u.starts_with("http://") && !u.starts_with("https://") {
        return true;
    }
    ["example.com", "placeholder.com", "placehold.it", "dummyimage.com"]
        .iter()
        .any(|d| u.contains(d))
}

fn remove_hallucinated_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if !is_placeholder_url(&caps[2]) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_with_json_fences() {
        let raw = "```json\n{\"front\": \"Q\", \"back\": \"A\"}\n```";
        assert_eq!(clean_model_reply(raw), r#"{"front": "Q", "back": "A"}"#);
    }

    #[test]
    fn reply_with_preamble() {
        let raw = "Sure! Here is your card:\r\n{\"front\": \"Q\", \"back\": \"A\"}\r\nGood luck.";
        assert_eq!(clean_model_reply(raw), r#"{"front": "Q", "back": "A"}"#);
    }

    #[test]
    fn reply_with_bom() {
        let raw = "\u{FEFF}{\"front\": \"Q\", \"back\": \"A\"}";
        assert_eq!(clean_model_reply(raw), r#"{"front": "Q", "back": "A"}"#);
    }

    #[test]
    fn blank_reply_stays_blank() {
        assert_eq!(clean_model_reply("  \n "), "");
    }

    #[test]
    fn reply_without_object_passes_through() {
        assert_eq!(clean_model_reply("no json here"), "no json here");
    }

    #[test]
    fn card_text_whitespace() {
        let text = "  - one   \r\n\r\n\r\n\r\n- two\u{200B}  \n";
        assert_eq!(clean_card_text(text), "- one\n\n- two");
    }

    #[test]
    fn card_text_drops_fake_images() {
        assert_eq!(
            clean_card_text("See ![Krebs cycle](diagram.png) above"),
            "See *Krebs cycle* above"
        );
        assert_eq!(
            clean_card_text("![Fig](https://arxiv.org/fig1.png)"),
            "![Fig](https://arxiv.org/fig1.png)"
        );
    }
}
