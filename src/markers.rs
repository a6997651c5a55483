//! Emoji markers in rendered text
//!
//! Renderers scan text for `:name:` markers, ask the cache for exactly those
//! names, then pick an image per definition.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::protocol::MimeType;
use crate::registry::EmojiDefinition;

static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([a-z0-9_]{1,32}):").expect("marker pattern is a valid regex"));

/// Distinct emoji names referenced by `text`
pub fn marker_names(text: &str) -> BTreeSet<String> {
    MARKER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// The image a renderer should draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRef<'a> {
    pub mime: MimeType,
    pub data: &'a [u8],
    pub is_fallback: bool,
}

impl EmojiDefinition {
    /// Main image unless animation is unwanted here, then the fallback if one exists
    pub fn select_image(&self, allow_animation: bool) -> ImageRef<'_> {
        let main = ImageRef {
            mime: self.mime,
            data: &self.data,
            is_fallback: false,
        };
        if allow_animation && self.animated != Some(false) {
            return main;
        }
        match &self.fallback {
            Some(fallback) => ImageRef {
                mime: fallback.mime,
                data: &fallback.data,
                is_fallback: true,
            },
            None => main,
        }
    }
}
