//! Persisted, ordered list of prompt templates.
//!
//! The catalog is loaded once from storage and written back after every edit.
//! Entries stored in the old block format are converted on load.

use serde_json::Value;
use shared::template::{default_templates, StoredTemplate, Template};
use std::sync::Arc;

use crate::storage::KeyValueStorage;

pub const TEMPLATES_KEY: &str = "templates";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("No template at position {position} (catalog has {len})")]
    OutOfRange { position: usize, len: usize },

    #[error("Stored templates are not a list")]
    InvalidFormat,

    #[error("Storage failed: {0}")]
    Storage(#[from] anyhow::Error),
}

pub struct TemplateCatalog {
    storage: Arc<dyn KeyValueStorage>,
    templates: Vec<Template>,
}

impl TemplateCatalog {
    /// Read the catalog from storage. A missing key yields an empty catalog.
    pub fn load(storage: Arc<dyn KeyValueStorage>) -> Result<Self, CatalogError> {
        let (templates, migrated) = match storage.get(TEMPLATES_KEY)? {
            None => (Vec::new(), false),
            Some(Value::Array(items)) => decode_entries(items),
            Some(_) => return Err(CatalogError::InvalidFormat),
        };

        let catalog = Self { storage, templates };
        if migrated {
            tracing::info!("migrated block templates to content format");
            catalog.persist()?;
        }
        Ok(catalog)
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Templates offered in the picker. Blank-named placeholders are skipped.
    pub fn pickable(&self) -> Vec<Template> {
        self.templates
            .iter()
            .filter(|t| !t.is_blank())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Template> {
        self.templates.get(position)
    }

    pub fn find(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn add(&mut self, template: Template) -> Result<usize, CatalogError> {
        self.templates.push(template);
        self.persist()?;
        Ok(self.templates.len() - 1)
    }

    pub fn update(&mut self, position: usize, template: Template) -> Result<(), CatalogError> {
        let slot = self.slot(position)?;
        *slot = template;
        self.persist()
    }

    pub fn remove(&mut self, position: usize) -> Result<Template, CatalogError> {
        self.slot(position)?;
        let removed = self.templates.remove(position);
        self.persist()?;
        Ok(removed)
    }

    /// Move the template at `from` so that it ends up at `to`.
    pub fn move_to(&mut self, from: usize, to: usize) -> Result<(), CatalogError> {
        self.slot(from)?;
        self.slot(to)?;
        let template = self.templates.remove(from);
        self.templates.insert(to, template);
        self.persist()
    }

    pub fn replace_all(&mut self, templates: Vec<Template>) -> Result<(), CatalogError> {
        self.templates = templates;
        self.persist()
    }

    pub fn seed_defaults(&mut self) -> Result<(), CatalogError> {
        self.replace_all(default_templates())
    }

    fn slot(&mut self, position: usize) -> Result<&mut Template, CatalogError> {
        let len = self.templates.len();
        self.templates
            .get_mut(position)
            .ok_or(CatalogError::OutOfRange { position, len })
    }

    fn persist(&self) -> Result<(), CatalogError> {
        let value = serde_json::to_value(&self.templates).map_err(anyhow::Error::from)?;
        self.storage.set(TEMPLATES_KEY, value)?;
        Ok(())
    }
}

/// Decode stored entries, skipping ones in neither format.
/// The flag reports whether any entry needed conversion.
fn decode_entries(items: Vec<Value>) -> (Vec<Template>, bool) {
    let mut migrated = false;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<StoredTemplate>(item) {
            Ok(StoredTemplate::Content(t)) => out.push(t),
            Ok(stored @ StoredTemplate::Blocks(_)) => {
                migrated = true;
                out.push(stored.into());
            }
            Err(e) => {
                migrated = true;
                tracing::warn!("dropping unreadable template entry: {}", e);
            }
        }
    }
    (out, migrated)
}
