use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("bad value for setting {key}: expecting {expected}")]
    TypeMismatch { key: String, expected: &'static str },
    #[error("expected {expected} panel values, got {got}")]
    ValueCountMismatch { expected: usize, got: usize },
    #[error("failed to save settings to {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A current or incoming setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(value) => Some(value),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            SettingValue::Bool(value) => Value::Bool(*value),
            SettingValue::Number(value) => Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SettingValue::Text(value) => Value::String(value.clone()),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(raw) => Some(SettingValue::Bool(*raw)),
            Value::Number(raw) => raw.as_f64().map(SettingValue::Number),
            Value::String(raw) => Some(SettingValue::Text(raw.clone())),
            _ => None,
        }
    }
}

/// Typed descriptor for one setting; carries the default.
///
/// A tagged kind instead of runtime type inspection: the panel validates an
/// incoming value against the kind family before anything is applied.
#[derive(Debug, Clone)]
pub enum SettingKind {
    Bool { default: bool },
    Number { default: f64 },
    Text { default: String },
    Choice { default: String, choices: Vec<String> },
}

impl SettingKind {
    pub fn default_value(&self) -> SettingValue {
        match self {
            SettingKind::Bool { default } => SettingValue::Bool(*default),
            SettingKind::Number { default } => SettingValue::Number(*default),
            SettingKind::Text { default } => SettingValue::Text(default.clone()),
            SettingKind::Choice { default, .. } => SettingValue::Text(default.clone()),
        }
    }

    /// Whether `value` belongs to this kind's type family.
    pub fn same_type(&self, value: &SettingValue) -> bool {
        matches!(
            (self, value),
            (SettingKind::Bool { .. }, SettingValue::Bool(_))
                | (SettingKind::Number { .. }, SettingValue::Number(_))
                | (SettingKind::Text { .. }, SettingValue::Text(_))
                | (SettingKind::Choice { .. }, SettingValue::Text(_))
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SettingKind::Bool { .. } => "boolean",
            SettingKind::Number { .. } => "number",
            SettingKind::Text { .. } | SettingKind::Choice { .. } => "string",
        }
    }
}

/// Change validator run by `set`; returning `Err` declines the new value.
pub type ChangeCallback = Box<dyn Fn(&SettingValue) -> Result<(), String> + Send + Sync>;

/// Settings panel section (tab id + display title).
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub id: String,
    pub title: String,
}

/// Registry metadata for one setting key.
pub struct SettingInfo {
    pub label: String,
    pub kind: SettingKind,
    pub section: Option<Section>,
    pub refresh: bool,
    pub on_change: Option<ChangeCallback>,
}

impl SettingInfo {
    pub fn bool(label: impl Into<String>, default: bool) -> Self {
        Self::new(label, SettingKind::Bool { default })
    }

    pub fn number(label: impl Into<String>, default: f64) -> Self {
        Self::new(label, SettingKind::Number { default })
    }

    pub fn text(label: impl Into<String>, default: impl Into<String>) -> Self {
        Self::new(
            label,
            SettingKind::Text {
                default: default.into(),
            },
        )
    }

    pub fn choice(
        label: impl Into<String>,
        default: impl Into<String>,
        choices: Vec<String>,
    ) -> Self {
        Self::new(
            label,
            SettingKind::Choice {
                default: default.into(),
                choices,
            },
        )
    }

    pub fn new(label: impl Into<String>, kind: SettingKind) -> Self {
        Self {
            label: label.into(),
            kind,
            section: None,
            refresh: false,
            on_change: None,
        }
    }

    pub fn section(mut self, id: impl Into<String>, title: impl Into<String>) -> Self {
        self.section = Some(Section {
            id: id.into(),
            title: title.into(),
        });
        self
    }

    pub fn refresh(mut self) -> Self {
        self.refresh = true;
        self
    }

    pub fn on_change(
        mut self,
        callback: impl Fn(&SettingValue) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }
}

/// Insertion-ordered key -> descriptor registry plus the current values.
#[derive(Default)]
pub struct SettingsStore {
    entries: Vec<(String, SettingInfo)>,
    index: HashMap<String, usize>,
    values: HashMap<String, SettingValue>,
    quicksettings: Vec<String>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, info: SettingInfo) {
        let key = key.into();
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, info));
    }

    /// Keys surfaced outside the main panel for fast access.
    pub fn set_quicksettings(&mut self, keys: Vec<String>) {
        self.quicksettings = keys;
    }

    pub fn quicksettings(&self) -> &[String] {
        &self.quicksettings
    }

    /// Registered keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn info(&self, key: &str) -> Option<&SettingInfo> {
        self.index.get(key).map(|&slot| &self.entries[slot].1)
    }

    /// Current value for `key`, falling back to the registered default.
    pub fn get(&self, key: &str) -> Option<SettingValue> {
        let info = self.info(key)?;
        Some(
            self.values
                .get(key)
                .cloned()
                .unwrap_or_else(|| info.kind.default_value()),
        )
    }

    /// Convenience for the boolean toggles the dispatcher consults.
    pub fn bool_value(&self, key: &str) -> bool {
        matches!(self.get(key), Some(SettingValue::Bool(true)))
    }

    pub fn same_type(&self, key: &str, value: &SettingValue) -> bool {
        self.info(key)
            .map(|info| info.kind.same_type(value))
            .unwrap_or(false)
    }

    /// Applies a new value, returning whether anything changed.
    ///
    /// Unknown keys and no-op writes report `false`. The key's change
    /// callback runs after the write; if it declines, the previous value is
    /// restored and `false` is reported.
    pub fn set(&mut self, key: &str, value: SettingValue) -> bool {
        let Some(&slot) = self.index.get(key) else {
            return false;
        };
        if self.get(key).as_ref() == Some(&value) {
            return false;
        }

        let previous = self.values.insert(key.to_string(), value.clone());
        if let Some(callback) = &self.entries[slot].1.on_change {
            if let Err(reason) = callback(&value) {
                log::warn!("Change to setting {} declined: {}", key, reason);
                match previous {
                    Some(restored) => {
                        self.values.insert(key.to_string(), restored);
                    }
                    None => {
                        self.values.remove(key);
                    }
                }
                return false;
            }
        }

        true
    }

    fn snapshot(&self) -> Map<String, Value> {
        let mut snapshot = Map::new();
        for (key, _) in &self.entries {
            if let Some(value) = self.get(key) {
                snapshot.insert(key.clone(), value.to_value());
            }
        }
        snapshot
    }

    /// Serialized snapshot of every registered key's current value.
    pub fn dump_json(&self) -> String {
        Value::Object(self.snapshot()).to_string()
    }

    /// Persists the snapshot as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let payload = serde_json::to_string_pretty(&Value::Object(self.snapshot()))?;
        std::fs::write(path, payload).map_err(|source| SettingsError::Save {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads previously saved values.
    ///
    /// A missing or unreadable file leaves the defaults in place; entries
    /// with the wrong type family for their key are skipped. Change
    /// callbacks do not run for loaded values.
    pub fn load(&mut self, path: &Path) {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return,
        };

        let parsed: HashMap<String, Value> = match serde_json::from_str(&content) {
            Ok(parsed) => parsed,
            Err(error) => {
                log::warn!(
                    "Ignoring corrupt settings file {}: {}",
                    path.display(),
                    error
                );
                return;
            }
        };

        for (key, raw) in parsed {
            let Some(value) = SettingValue::from_value(&raw) else {
                continue;
            };
            if self.same_type(&key, &value) {
                self.values.insert(key, value);
            }
        }
    }
}

/// Settings the generation surfaces consult directly.
pub fn default_ui_settings() -> SettingsStore {
    let mut store = SettingsStore::new();
    store.register(
        "enable_console_prompts",
        SettingInfo::bool("Print prompts to console when generating", false).section(
            "system",
            "System",
        ),
    );
    store.register(
        "samples_log_stdout",
        SettingInfo::bool("Always print generation info to console", false)
            .section("system", "System"),
    );
    store.register(
        "do_not_show_images",
        SettingInfo::bool("Do not show images in results for web", false)
            .section("ui", "User interface"),
    );
    store
}

/// Signal returned to the UI by a single-setting apply.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingUpdate {
    /// Commit succeeded; display this refreshed value.
    Value(SettingValue),
    /// Commit declined; revert the widget to the stored value.
    Revert(SettingValue),
    /// Type validation failed; show the validation marker, nothing changed.
    ShowValidation,
}

/// Panel-side binding for one widget slot: a real setting or a UI-internal
/// placeholder that must never be written through.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelBinding {
    Setting(String),
    Placeholder,
}

/// Batch/single apply logic for the settings panel.
pub struct SettingsPanel {
    bindings: Vec<PanelBinding>,
    config_path: PathBuf,
}

impl SettingsPanel {
    /// Builds panel bindings in registry order. Quicksettings and
    /// sectionless keys render elsewhere, so their panel slots are
    /// placeholders.
    pub fn from_store(store: &SettingsStore, config_path: PathBuf) -> Self {
        let bindings = store
            .keys()
            .map(|key| {
                let sectionless = store
                    .info(key)
                    .map(|info| info.section.is_none())
                    .unwrap_or(true);
                if sectionless || store.quicksettings().iter().any(|quick| quick == key) {
                    PanelBinding::Placeholder
                } else {
                    PanelBinding::Setting(key.to_string())
                }
            })
            .collect();

        Self {
            bindings,
            config_path,
        }
    }

    pub fn bindings(&self) -> &[PanelBinding] {
        &self.bindings
    }

    /// Applies a full panel submission.
    ///
    /// Every value is type-checked before any is committed; one bad value
    /// fails the whole batch. Returns the serialized snapshot and a
    /// human-readable change summary. A failed save keeps the in-memory
    /// changes and says so in the summary instead of failing.
    pub fn apply_all(
        &self,
        store: &mut SettingsStore,
        values: &[SettingValue],
    ) -> Result<(String, String), SettingsError> {
        if values.len() != self.bindings.len() {
            return Err(SettingsError::ValueCountMismatch {
                expected: self.bindings.len(),
                got: values.len(),
            });
        }

        for (binding, value) in self.bindings.iter().zip(values) {
            let PanelBinding::Setting(key) = binding else {
                continue;
            };
            if !store.same_type(key, value) {
                let expected = store
                    .info(key)
                    .map(|info| info.kind.type_name())
                    .unwrap_or("value");
                return Err(SettingsError::TypeMismatch {
                    key: key.clone(),
                    expected,
                });
            }
        }

        let mut changed = Vec::new();
        for (binding, value) in self.bindings.iter().zip(values) {
            let PanelBinding::Setting(key) = binding else {
                continue;
            };
            if store.set(key, value.clone()) {
                changed.push(key.clone());
            }
        }

        if let Err(error) = store.save(&self.config_path) {
            log::warn!("{}", error);
            return Ok((
                store.dump_json(),
                format!(
                    "{} settings changed without save: {}.",
                    changed.len(),
                    changed.join(", ")
                ),
            ));
        }

        let summary = format!(
            "{} settings changed{}{}.",
            changed.len(),
            if changed.is_empty() { "" } else { ": " },
            changed.join(", ")
        );
        Ok((store.dump_json(), summary))
    }

    /// Applies one setting change from a quicksetting or panel widget.
    ///
    /// Type mismatches show the validation marker without mutating; an
    /// absent value or a declined commit reverts the widget to the stored
    /// value; a successful commit persists immediately.
    pub fn apply_single(
        &self,
        store: &mut SettingsStore,
        value: Option<SettingValue>,
        key: &str,
    ) -> (SettingUpdate, String) {
        if store.info(key).is_none() {
            return (SettingUpdate::ShowValidation, store.dump_json());
        }

        if let Some(candidate) = &value {
            if !store.same_type(key, candidate) {
                return (SettingUpdate::ShowValidation, store.dump_json());
            }
        }

        let committed = match value {
            Some(candidate) => store.set(key, candidate),
            None => false,
        };

        let update = match store.get(key) {
            Some(stored) if committed => {
                if let Err(error) = store.save(&self.config_path) {
                    log::warn!("{}", error);
                }
                SettingUpdate::Value(stored)
            }
            Some(stored) => SettingUpdate::Revert(stored),
            None => SettingUpdate::ShowValidation,
        };
        (update, store.dump_json())
    }
}
