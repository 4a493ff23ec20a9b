//! Install and update hooks.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::storage::KeyValueStorage;
use crate::template_catalog::TemplateCatalog;

pub const INSTALLED_VERSION_KEY: &str = "installedVersion";
pub const INSTALLED_AT_KEY: &str = "installedAt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Install,
    Update,
    BrowserUpdate,
    SharedModuleUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub seeded_templates: bool,
}

/// Reason to fire for `current_version`, judged by the version recorded at the
/// last install. `None` when nothing changed.
pub fn detect_reason(
    storage: &dyn KeyValueStorage,
    current_version: &str,
) -> Result<Option<(InstallReason, Option<String>)>> {
    let previous = match storage.get(INSTALLED_VERSION_KEY)? {
        Some(Value::String(v)) => Some(v),
        _ => None,
    };
    Ok(match previous {
        None => Some((InstallReason::Install, None)),
        Some(v) if v != current_version => Some((InstallReason::Update, Some(v))),
        Some(_) => None,
    })
}

/// Seeds default templates on first install, and after an update that left the
/// catalog empty. Other reasons are only logged.
pub fn on_installed(
    storage: Arc<dyn KeyValueStorage>,
    reason: InstallReason,
    previous_version: Option<&str>,
    current_version: &str,
) -> Result<InstallOutcome> {
    tracing::info!(
        "install event {:?}: previous version {:?}, current version {}",
        reason,
        previous_version,
        current_version
    );

    let mut catalog = TemplateCatalog::load(storage.clone()).context("Failed to load templates")?;
    let seed = match reason {
        InstallReason::Install => true,
        InstallReason::Update => catalog.is_empty(),
        InstallReason::BrowserUpdate | InstallReason::SharedModuleUpdate => false,
    };
    if seed {
        catalog.seed_defaults().context("Failed to seed default templates")?;
        tracing::info!("seeded {} default templates", catalog.templates().len());
    }

    if matches!(reason, InstallReason::Install | InstallReason::Update) {
        storage.set(INSTALLED_VERSION_KEY, json!(current_version))?;
        storage.set(INSTALLED_AT_KEY, json!(Utc::now().to_rfc3339()))?;
    }

    Ok(InstallOutcome {
        seeded_templates: seed,
    })
}
