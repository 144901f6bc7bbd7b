//! Anaphoric reference resolution — binds "it" / "that file" / "the image"
//! to context variables.
//!
//! Resolution is conservative: a slot only binds when the utterance carries
//! both a reference word and the matching domain noun, or when the last
//! same-kind action result exists. The utterance text itself is never
//! rewritten; the planner receives the bindings alongside it.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::context::ConversationContext;
use crate::types::{keys, ActionKind};

/// Slot name → bound context value.
pub type ResolvedValues = BTreeMap<String, Value>;

const PRONOUNS: &[&str] = &["it", "this", "that", "these", "those", "them"];

const PHRASES: &[&str] = &[
    "the image",
    "the file",
    "the text",
    "the summary",
    "the result",
    "the output",
    "last image",
    "last file",
    "previous result",
    "that image",
    "that file",
];

pub struct ReferenceResolver;

impl ReferenceResolver {
    /// Does the text contain anything worth resolving?
    pub fn needs_resolution(text: &str) -> bool {
        let lower = text.to_lowercase();
        let padded = format!(" {lower} ");

        // Pronouns must sit at word boundaries — "item" is not "it".
        if PRONOUNS.iter().any(|p| padded.contains(&format!(" {p} "))) {
            return true;
        }

        PHRASES.iter().any(|phrase| lower.contains(phrase))
    }

    /// Resolve references against the context.
    ///
    /// Returns the text unchanged plus the slot bindings the planner merges
    /// into action parameters.
    pub fn resolve(text: &str, context: &ConversationContext) -> (String, ResolvedValues) {
        let mut resolved = ResolvedValues::new();
        let lower = text.to_lowercase();

        let refers = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        // Image: needs the word "image" or a prior image-generate result.
        if let Some(last_image) = context.get_str(keys::LAST_GENERATED_IMAGE) {
            if refers(&["the image", "that image", "it", "this"])
                && (lower.contains("image")
                    || context
                        .get_last_action_result(Some(ActionKind::ImageGenerate))
                        .is_some())
            {
                resolved.insert("image_path".into(), Value::String(last_image.to_string()));
            }
        }

        // File: prefer the tail of created_files over the scalar variable.
        if let Some(last_file) = context.get_str(keys::LAST_CREATED_FILE) {
            let created = context.get_list(keys::CREATED_FILES);
            let last_file = created
                .last()
                .and_then(Value::as_str)
                .unwrap_or(last_file)
                .to_string();

            if refers(&["the file", "that file", "it", "this"]) && lower.contains("file") {
                resolved.insert("file_path".into(), Value::String(last_file));
            }
        }

        // Music: needs a music noun or a prior music-generate result.
        if let Some(last_music) = context.get_str(keys::LAST_GENERATED_MUSIC) {
            if refers(&["the music", "the song", "that song", "it", "this"])
                && (lower.contains("music")
                    || lower.contains("song")
                    || context
                        .get_last_action_result(Some(ActionKind::MusicGenerate))
                        .is_some())
            {
                resolved.insert("music_path".into(), Value::String(last_music.to_string()));
            }
        }

        if let Some(ocr) = context.get_str(keys::LAST_OCR_TEXT) {
            if refers(&["the text", "ocr text", "that text", "it"]) {
                resolved.insert("ocr_text".into(), Value::String(ocr.to_string()));
            }
        }

        if let Some(generated) = context.get_str(keys::LAST_GENERATED_TEXT) {
            if refers(&["the summary", "the result", "that"]) {
                resolved.insert("generated_text".into(), Value::String(generated.to_string()));
            }
        }

        (text.to_string(), resolved)
    }
}
