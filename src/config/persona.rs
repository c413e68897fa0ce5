//! Persistence of the last selected persona.
//!
//! A single key holding the persona as JSON, read at bootstrap and
//! overwritten on every user selection.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::read_json_file;
use crate::error::{TalkError, TalkResult};
use crate::model::PersonaProfile;

/// Key-value access to the remembered persona.
pub trait PersonaStore {
    fn load(&self) -> Option<PersonaProfile>;
    fn save(&self, persona: &PersonaProfile) -> TalkResult<()>;
}

/// Stores the persona in `<data_dir>/persona.json`.
pub struct FilePersonaStore {
    path: PathBuf,
}

impl FilePersonaStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("persona.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersonaStore for FilePersonaStore {
    fn load(&self) -> Option<PersonaProfile> {
        read_json_file(&self.path)
    }

    fn save(&self, persona: &PersonaProfile) -> TalkResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TalkError::Persistence(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(persona)
            .map_err(|e| TalkError::Persistence(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| TalkError::Persistence(e.to_string()))?;
        debug!(persona = %persona.id, path = %self.path.display(), "Persona saved");
        Ok(())
    }
}
