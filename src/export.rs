//! Obsidian vault export.
//!
//! A finished job is packed into a ZIP that unpacks into one folder:
//!
//! ```text
//! <folder>/<folder>.md                master note linking every card
//! <folder>/<card front>.md            one note per completed page
//! <folder>/create_slides_script.txt   Google Apps Script rebuilding the deck
//! ```
//!
//! Only `Completed` items are exported; failed pages are silently left out.
//! The archive is built from the snapshot alone, so it can be produced for a
//! job that is still running.

use crate::error::FlashcardError;
use crate::job::Job;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Name of the Apps Script file inside the vault folder.
pub const SLIDES_SCRIPT_FILE: &str = "create_slides_script.txt";

static RE_FORBIDDEN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
static RE_EDGES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^\s+|\s+$|\.+$)").unwrap());
static RE_DASH_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").unwrap());

/// Make `name` safe as a file or folder name on every desktop OS.
///
/// Path separators and reserved characters become `-`. Leading and trailing
/// whitespace and a trailing run of dots are removed in a single pass, so
/// `"a. "` keeps its dot. Runs of dashes collapse to one, and an empty result
/// becomes `Untitled`.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = RE_FORBIDDEN.replace_all(name, "-");
    let trimmed = RE_EDGES.replace_all(&replaced, "");
    let collapsed = RE_DASH_RUN.replace_all(&trimmed, "-");
    if collapsed.is_empty() {
        "Untitled".to_string()
    } else {
        collapsed.into_owned()
    }
}

/// Vault folder name for a job: its file name without `.pdf`, sanitised.
pub fn folder_name(job: &Job) -> String {
    sanitize_filename(&job.filename.replace(".pdf", ""))
}

#[derive(Serialize)]
struct ScriptCard<'a> {
    front: &'a str,
    back: &'a str,
    page: usize,
}

/// Build the vault ZIP for `job`.
pub fn build_vault(job: &Job) -> Result<Vec<u8>, FlashcardError> {
    let folder = folder_name(job);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut used = HashSet::new();
    let mut notes = Vec::new();
    for card in job.completed_cards() {
        let base = sanitize_filename(&card.front);
        let mut name = base.clone();
        let mut counter = 1;
        while used.contains(&name) {
            name = format!("{base}-{counter}");
            counter += 1;
        }
        used.insert(name.clone());

        let content = format!(
            "# {front}\n\n[[{folder}]] (Page {page})\n\n## Front\n{front}\n\n## Back\n{back}\n",
            front = card.front,
            page = card.page_number,
            back = card.back,
        );
        notes.push((name, content));
    }

    let mut master = format!(
        "# {folder}\n\nProcessed on: {}\nTotal Slides: {}\n\n## Concepts\n",
        job.upload_date.format("%a %b %e %H:%M:%S %Y"),
        job.total_slides,
    );
    for (name, _) in &notes {
        master.push_str(&format!("- [[{name}]]\n"));
    }

    write_entry(&mut zip, &format!("{folder}/{folder}.md"), &master, options)?;
    for (name, content) in &notes {
        write_entry(&mut zip, &format!("{folder}/{name}.md"), content, options)?;
    }
    let script = slides_script(job)?;
    write_entry(
        &mut zip,
        &format!("{folder}/{SLIDES_SCRIPT_FILE}"),
        &script,
        options,
    )?;

    let bytes = zip
        .finish()
        .map_err(|e| FlashcardError::ExportFailed(e.to_string()))?
        .into_inner();
    debug!(
        "Job {}: exported {} cards ({} bytes)",
        job.id,
        notes.len(),
        bytes.len()
    );
    Ok(bytes)
}

fn write_entry(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    path: &str,
    content: &str,
    options: SimpleFileOptions,
) -> Result<(), FlashcardError> {
    zip.start_file(path, options)
        .map_err(|e| FlashcardError::ExportFailed(format!("{path}: {e}")))?;
    zip.write_all(content.as_bytes())
        .map_err(|e| FlashcardError::ExportFailed(format!("{path}: {e}")))
}

/// Apps Script that creates a Google Slides deck with one slide per card.
fn slides_script(job: &Job) -> Result<String, FlashcardError> {
    let title = serde_json::to_string(&job.filename.replace(".pdf", ""))
        .map_err(|e| FlashcardError::ExportFailed(e.to_string()))?;
    let cards: Vec<ScriptCard<'_>> = job
        .completed_cards()
        .map(|c| ScriptCard {
            front: &c.front,
            back: &c.back,
            page: c.page_number,
        })
        .collect();
    let cards =
        serde_json::to_string(&cards).map_err(|e| FlashcardError::ExportFailed(e.to_string()))?;

    Ok(format!(
        r#"/**
 * Google Apps Script that builds a Google Slides deck from these flashcards.
 * Paste it into https://script.google.com/home and run createPresentation.
 */
function createPresentation() {{
  var title = {title};
  var slides = SlidesApp.create(title);
  var deck = slides.getSlides();
  if (deck.length > 0) {{
    deck[0].remove();
  }}

  var cards = {cards};

  cards.forEach(function(card) {{
    var slide = slides.appendSlide(SlidesApp.SlideLayout.TITLE_AND_BODY);
    slide.getPlaceholder(SlidesApp.PlaceholderType.TITLE).asShape().getText().setText(card.front);
    slide.getPlaceholder(SlidesApp.PlaceholderType.BODY).asShape().getText().setText(card.back);

    var footer = slide.insertTextBox("Source: Page " + card.page, 0, 400, 300, 50);
    footer.getText().getTextStyle().setFontSize(10).setForegroundColor('#888888');
  }});

  Logger.log('Presentation created: ' + slides.getUrl());
}}
"#
    ))
}
