use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Profile name whose backend is a local model registry (Ollama).
pub const REGISTRY_PROFILE: &str = "Ollama";

/// Immutable settings snapshot. Updates replace the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub model: String,
    pub source_lang: String,
    pub target_lang: String,
    pub hotkey: String,
    pub active_profile: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            model: "HY-MT1.5-1.8B".to_string(),
            source_lang: "English".to_string(),
            target_lang: "Russian".to_string(),
            hotkey: "ctrl+alt+t".to_string(),
            active_profile: "Custom".to_string(),
        }
    }
}

impl Settings {
    pub fn default_path() -> PathBuf {
        let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
        let dir = exe.parent().unwrap_or(Path::new("."));
        dir.join("settings.json")
    }

    /// Missing keys take their defaults; an unreadable file yields defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => serde_json::from_str::<Settings>(&s).unwrap_or_else(|e| {
                warn!("Ignoring malformed {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let s = serde_json::to_string_pretty(self)?;
        fs::write(path, s).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Non-empty `TRANSLATOR_*` variables override file values.
    pub fn with_env_overrides(mut self) -> Self {
        let fields: [(&str, &mut String); 6] = [
            ("TRANSLATOR_BASE_URL", &mut self.base_url),
            ("TRANSLATOR_MODEL", &mut self.model),
            ("TRANSLATOR_SOURCE_LANG", &mut self.source_lang),
            ("TRANSLATOR_TARGET_LANG", &mut self.target_lang),
            ("TRANSLATOR_HOTKEY", &mut self.hotkey),
            ("TRANSLATOR_PROFILE", &mut self.active_profile),
        ];
        for (var, field) in fields {
            if let Ok(v) = std::env::var(var) {
                if !v.is_empty() {
                    *field = v;
                }
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            bail!("Base URL cannot be empty.");
        }
        if self.model.trim().is_empty() {
            bail!("Model ID cannot be empty.");
        }
        Ok(())
    }

    pub fn uses_model_registry(&self) -> bool {
        self.active_profile.eq_ignore_ascii_case(REGISTRY_PROFILE)
    }
}
