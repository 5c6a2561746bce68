pub mod backend;
pub mod commands;
pub mod fields;
pub mod gallery;
pub mod hashing;
pub mod html;
pub mod parser;
pub mod pipeline;
pub mod request;
pub mod session;
pub mod settings;

use pipeline::Dispatcher;
use session::GenerationSession;
use settings::{SettingsPanel, SettingsStore};
use std::path::PathBuf;
use std::sync::RwLock;

/// Shared application state for the UI-facing command surface.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub session: GenerationSession,
    pub settings: RwLock<SettingsStore>,
    pub panel: SettingsPanel,
}

impl AppState {
    /// Wires up the command surface: loads persisted settings from
    /// `config_path` (defaults stand on a missing or corrupt file) and
    /// builds the panel bindings from the registry.
    pub fn new(dispatcher: Dispatcher, mut settings: SettingsStore, config_path: PathBuf) -> Self {
        settings.load(&config_path);
        let panel = SettingsPanel::from_store(&settings, config_path);

        Self {
            dispatcher,
            session: GenerationSession::new(),
            settings: RwLock::new(settings),
            panel,
        }
    }
}
