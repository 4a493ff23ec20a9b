//! Turns a pointer-up on the page into the text the prompt is built from.

use serde::{Deserialize, Serialize};
use shared::settings::SelectionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, by: Point) -> Point {
        Point::new(self.x + by.x, self.y + by.y)
    }
}

/// Viewport-relative bounding box of the selected range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub selected_text: String,
    pub surrounding_text: String,
    /// Pointer position in viewport coordinates.
    pub anchor: Point,
}

/// Where to open the template picker and the chat popup for a selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchors {
    /// Document coordinates (viewport plus scroll).
    pub picker: Point,
    /// Viewport coordinates.
    pub popup: Point,
}

pub struct SelectionExtractor {
    chars_before: usize,
    chars_after: usize,
}

impl SelectionExtractor {
    pub fn new(settings: SelectionSettings) -> Self {
        Self {
            chars_before: settings.chars_before,
            chars_after: settings.chars_after,
        }
    }

    /// `None` for an empty selection; the caller dismisses the picker.
    pub fn extract(&self, page_text: &str, raw_selection: &str, pointer: Point) -> Option<Selection> {
        let selected_text = raw_selection.trim();
        if selected_text.is_empty() {
            return None;
        }

        Some(Selection {
            selected_text: selected_text.to_string(),
            surrounding_text: surrounding_window(
                page_text,
                raw_selection,
                self.chars_before,
                self.chars_after,
            ),
            anchor: pointer,
        })
    }
}

/// Plain text around the first occurrence of `needle`, newlines flattened.
///
/// Windows are counted in characters. When `needle` is not found verbatim (a
/// selection spanning interactive elements, say) the page prefix of
/// `before + after` characters is used instead.
pub fn surrounding_window(haystack: &str, needle: &str, before: usize, after: usize) -> String {
    let window = match haystack.find(needle) {
        Some(found) => {
            let start = haystack[..found]
                .char_indices()
                .rev()
                .take(before)
                .last()
                .map(|(i, _)| i)
                .unwrap_or(found);
            let tail = found + needle.len();
            let end = haystack[tail..]
                .char_indices()
                .nth(after)
                .map(|(i, _)| tail + i)
                .unwrap_or(haystack.len());
            &haystack[start..end]
        }
        None => {
            let end = haystack
                .char_indices()
                .nth(before + after)
                .map(|(i, _)| i)
                .unwrap_or(haystack.len());
            &haystack[..end]
        }
    };
    window.replace('\n', " ")
}

/// Anchor at the bottom-right of the selection, or at the pointer when the
/// browser reports a zero rectangle.
pub fn anchors(rect: Option<Rect>, pointer: Point, scroll: Point) -> Anchors {
    let popup = match rect {
        Some(r) if !(r.top == 0.0 && r.left == 0.0) => Point::new(r.right, r.bottom),
        _ => pointer,
    };
    Anchors {
        picker: popup.offset(scroll),
        popup,
    }
}
