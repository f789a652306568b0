// Stepwright: Action registry (built-in catalog + custom components)

pub mod catalog;
pub mod naming;

pub use naming::{generate_action_id, suggest_icon_for_action};

use crate::error::{EngineError, EngineResult};
use crate::workflow::WorkflowStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Format constraint checked on a field's resolved value before a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldFormat {
    Url,
    Email,
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FieldFormat>,
    /// Other param keys accepted for this field, checked in order after
    /// `name`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl FieldSpec {
    pub fn required(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            format: None,
            aliases: Vec::new(),
        }
    }

    pub fn optional(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            format: None,
            aliases: Vec::new(),
        }
    }

    pub fn with_format(mut self, format: FieldFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Param keys for this field, primary name first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub action: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub is_container: bool,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,
}

/// Build a custom component descriptor for `label`.
pub fn create_custom_component(
    label: &str,
    description: &str,
    fields: Vec<FieldSpec>,
) -> ActionDescriptor {
    ActionDescriptor {
        action: generate_action_id(label),
        icon: suggest_icon_for_action(label).to_string(),
        label: label.trim().to_string(),
        description: description.to_string(),
        is_container: false,
        is_custom: true,
        created_at: Some(Utc::now()),
        fields,
    }
}

/// Immutable id → descriptor view used by validation.
pub type CatalogSnapshot = HashMap<String, ActionDescriptor>;

// ---------------------------------------------------------------------------
// Persistence file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RegistryFile {
    #[serde(default)]
    custom: Vec<ActionDescriptor>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Built-in catalog plus custom components, shared behind an async lock.
///
/// Custom components are persisted to a JSON file when a storage path is
/// configured; the built-in catalog is compiled in and never written.
#[derive(Clone)]
pub struct ActionRegistry {
    builtin: Arc<HashMap<String, ActionDescriptor>>,
    custom: Arc<RwLock<BTreeMap<String, ActionDescriptor>>>,
    storage: Option<PathBuf>,
}

impl ActionRegistry {
    pub fn new(storage: Option<PathBuf>) -> Self {
        let builtin = catalog::builtin_actions()
            .into_iter()
            .map(|d| (d.action.clone(), d))
            .collect();

        Self {
            builtin: Arc::new(builtin),
            custom: Arc::new(RwLock::new(BTreeMap::new())),
            storage,
        }
    }

    /// Registry without persistence.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Open a file-backed registry and load its custom components.
    pub async fn open(path: &Path) -> EngineResult<Self> {
        let registry = Self::new(Some(path.to_path_buf()));
        registry.load().await?;
        Ok(registry)
    }

    pub fn storage_path(&self) -> Option<&Path> {
        self.storage.as_deref()
    }

    /// Replace the custom cache with the persisted records. A missing file
    /// leaves the cache empty.
    pub async fn load(&self) -> EngineResult<usize> {
        let Some(path) = &self.storage else {
            return Ok(0);
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No action registry file yet");
            return Ok(0);
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            EngineError::Registry(format!("failed to read {}: {}", path.display(), e))
        })?;
        let file: RegistryFile = serde_json::from_str(&content).map_err(|e| {
            EngineError::Registry(format!("invalid registry file {}: {}", path.display(), e))
        })?;

        let mut custom = self.custom.write().await;
        custom.clear();
        for mut descriptor in file.custom {
            if self.builtin.contains_key(&descriptor.action) {
                tracing::warn!(action = %descriptor.action, "Skipping custom component that shadows a built-in action");
                continue;
            }
            descriptor.is_custom = true;
            custom.insert(descriptor.action.clone(), descriptor);
        }

        tracing::info!(path = %path.display(), count = custom.len(), "Loaded custom components");
        Ok(custom.len())
    }

    /// Write every custom component to the storage file.
    pub async fn save(&self) -> EngineResult<()> {
        let Some(path) = &self.storage else {
            return Ok(());
        };

        let file = RegistryFile {
            custom: self.custom.read().await.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| EngineError::Registry(format!("failed to serialize registry: {}", e)))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::Registry(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::write(path, json).await.map_err(|e| {
            EngineError::Registry(format!("failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    pub async fn action_exists(&self, id: &str) -> bool {
        self.builtin.contains_key(id) || self.custom.read().await.contains_key(id)
    }

    pub async fn get(&self, id: &str) -> Option<ActionDescriptor> {
        if let Some(d) = self.builtin.get(id) {
            return Some(d.clone());
        }
        self.custom.read().await.get(id).cloned()
    }

    pub fn builtin(&self) -> Vec<ActionDescriptor> {
        let mut list: Vec<ActionDescriptor> = self.builtin.values().cloned().collect();
        list.sort_by(|a, b| a.action.cmp(&b.action));
        list
    }

    pub async fn custom(&self) -> Vec<ActionDescriptor> {
        self.custom.read().await.values().cloned().collect()
    }

    pub async fn snapshot(&self) -> CatalogSnapshot {
        let mut all: CatalogSnapshot = (*self.builtin).clone();
        for (id, d) in self.custom.read().await.iter() {
            all.insert(id.clone(), d.clone());
        }
        all
    }

    /// Return the custom component for `label`, creating it if no component
    /// with the generated id exists yet. The flag tells whether it was new.
    pub async fn request_custom_action(
        &self,
        label: &str,
        description: &str,
        fields: Vec<FieldSpec>,
    ) -> EngineResult<(ActionDescriptor, bool)> {
        let id = generate_action_id(label);

        if let Some(existing) = self.builtin.get(&id) {
            return Ok((existing.clone(), false));
        }

        let created = {
            let mut custom = self.custom.write().await;
            if let Some(existing) = custom.get(&id) {
                return Ok((existing.clone(), false));
            }
            let descriptor = create_custom_component(label, description, fields);
            custom.insert(id.clone(), descriptor.clone());
            descriptor
        };

        tracing::info!(action = %created.action, label = %created.label, "Created custom component");
        self.save().await?;
        Ok((created, true))
    }

    /// Make every step in the tree reference a known action. Unknown actions
    /// get a custom component (reused by id when one already exists); the
    /// step is rewritten to that id and flagged as custom. Returns the
    /// components created by this call.
    pub async fn reconcile_steps(
        &self,
        steps: &mut [WorkflowStep],
    ) -> EngineResult<Vec<ActionDescriptor>> {
        let pending = self.plan_custom_components(steps).await;
        self.register_custom(pending).await
    }

    /// Rewrite unknown actions in the tree to custom component ids without
    /// registering anything. Returns the components that do not exist yet,
    /// one per id.
    pub async fn plan_custom_components(&self, steps: &mut [WorkflowStep]) -> Vec<ActionDescriptor> {
        let mut pending: Vec<ActionDescriptor> = Vec::new();
        let mut stack: Vec<&mut WorkflowStep> = steps.iter_mut().rev().collect();

        while let Some(step) = stack.pop() {
            if !self.action_exists(&step.action).await {
                let source = if step.label.trim().is_empty() {
                    step.action.clone()
                } else {
                    step.label.clone()
                };
                let id = generate_action_id(&source);
                let descriptor = match self.get(&id).await {
                    Some(existing) => existing,
                    None => match pending.iter().find(|d| d.action == id) {
                        Some(planned) => planned.clone(),
                        None => {
                            let d = create_custom_component(&source, "", Vec::new());
                            pending.push(d.clone());
                            d
                        }
                    },
                };
                tracing::debug!(step = %step.id, from = %step.action, to = %descriptor.action, "Mapped unknown action to custom component");
                step.action = descriptor.action.clone();
                step.is_custom_action = true;
                if step.icon.is_empty() {
                    step.icon = descriptor.icon.clone();
                }
            } else if let Some(d) = self.custom.read().await.get(&step.action) {
                step.is_custom_action = d.is_custom;
            }

            stack.extend(step.children.iter_mut().rev());
        }

        pending
    }

    /// Add planned components that are still missing and persist once.
    /// Returns the ones actually inserted.
    pub async fn register_custom(
        &self,
        descriptors: Vec<ActionDescriptor>,
    ) -> EngineResult<Vec<ActionDescriptor>> {
        let mut created = Vec::new();
        {
            let mut custom = self.custom.write().await;
            for descriptor in descriptors {
                if self.builtin.contains_key(&descriptor.action)
                    || custom.contains_key(&descriptor.action)
                {
                    continue;
                }
                tracing::info!(action = %descriptor.action, label = %descriptor.label, "Created custom component");
                custom.insert(descriptor.action.clone(), descriptor.clone());
                created.push(descriptor);
            }
        }
        if !created.is_empty() {
            self.save().await?;
        }
        Ok(created)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}
