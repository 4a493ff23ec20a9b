//! Template picker state: search filter, highlight and the synthesized custom entry.

use shared::template::Template;

use crate::selection::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerKey {
    ArrowUp,
    ArrowDown,
    Enter,
}

/// One row of the picker as presentation should draw it.
#[derive(Debug, Clone, PartialEq)]
pub struct PickerOption {
    pub label: String,
    pub highlighted: bool,
    pub is_custom: bool,
}

pub struct TemplatePicker {
    templates: Vec<Template>,
    query: String,
    highlighted: Option<usize>,
    position: Point,
}

impl TemplatePicker {
    pub fn new(templates: Vec<Template>, position: Point) -> Self {
        Self {
            templates,
            query: String::new(),
            highlighted: None,
            position,
        }
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn highlighted(&self) -> Option<usize> {
        self.highlighted
    }

    /// Editing the query moves the highlight back to the first row.
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
        self.highlighted = Some(0);
    }

    pub fn focus(&mut self) {
        self.highlighted = Some(0);
    }

    fn filtered(&self) -> Vec<&Template> {
        let needle = self.query.to_lowercase();
        self.templates
            .iter()
            .filter(|t| t.name.to_lowercase().contains(&needle))
            .collect()
    }

    fn has_custom(&self) -> bool {
        !self.query.trim().is_empty()
    }

    fn option_count(&self) -> usize {
        self.filtered().len() + usize::from(self.has_custom())
    }

    pub fn options(&self) -> Vec<PickerOption> {
        let mut rows: Vec<PickerOption> = self
            .filtered()
            .iter()
            .enumerate()
            .map(|(i, t)| PickerOption {
                label: t.name.clone(),
                highlighted: self.highlighted == Some(i),
                is_custom: false,
            })
            .collect();
        if self.has_custom() {
            rows.push(PickerOption {
                label: format!("Custom: {}", self.query),
                highlighted: self.highlighted == Some(rows.len()),
                is_custom: true,
            });
        }
        rows
    }

    /// Template behind row `row`, the custom entry being the last row.
    pub fn choose(&self, row: usize) -> Option<Template> {
        let filtered = self.filtered();
        if let Some(t) = filtered.get(row) {
            return Some((*t).clone());
        }
        (row == filtered.len() && self.has_custom()).then(|| Template::custom(&self.query))
    }

    /// Arrow keys wrap around; Enter returns the committed template.
    pub fn handle_key(&mut self, key: PickerKey) -> Option<Template> {
        let count = self.option_count();
        match key {
            PickerKey::ArrowDown if count > 0 => {
                self.highlighted = Some(match self.highlighted {
                    Some(i) if i + 1 < count => i + 1,
                    _ => 0,
                });
                None
            }
            PickerKey::ArrowUp if count > 0 => {
                self.highlighted = Some(match self.highlighted {
                    Some(i) if i > 0 && i < count => i - 1,
                    _ => count - 1,
                });
                None
            }
            PickerKey::Enter => self.highlighted.and_then(|row| self.choose(row)),
            _ => None,
        }
    }
}
