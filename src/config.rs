//! Service configuration.
//!
//! Environment settings are read once at startup into [`AppConfig`]. Prompt
//! configs, one per ingestion mode, are loaded from the `configs/` directory
//! into a [`ConfigStore`]; the copies compiled into the binary are used when
//! that directory is missing.

use crate::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::retry::RetryPolicy;
use crate::store::StaffMember;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_MODE: &str = "brain_dump";

const BUILTIN_CONFIGS: [&str; 3] = [
    include_str!("../configs/brain_dump.json"),
    include_str!("../configs/meeting_minutes.json"),
    include_str!("../configs/calendar.json"),
];

#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub url: String,
    pub service_role_key: String,
}

/// Settings read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    /// `None` runs the service on the in-memory store.
    pub supabase: Option<SupabaseSettings>,
    pub bind_addr: String,
    pub prompt_config_dir: PathBuf,
    pub retry: RetryPolicy,
    pub recent_fetch_limit: usize,
    /// JSON map of account id to staff list, for the in-memory store.
    pub staff_seed_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let gemini_api_key = var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?;

        let supabase = match (var("SUPABASE_URL"), var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseSettings {
                url,
                service_role_key,
            }),
            _ => None,
        };

        let max_retries = parse_var(&var, "LLM_MAX_RETRIES", 3u32)?;
        let initial_backoff_ms = parse_var(&var, "LLM_INITIAL_BACKOFF_MS", 1000u64)?;

        Ok(Self {
            gemini_api_key,
            gemini_model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gemini_base_url: var("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            supabase,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            prompt_config_dir: var("PROMPT_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("configs")),
            retry: RetryPolicy {
                max_retries,
                initial_backoff: Duration::from_millis(initial_backoff_ms),
            },
            recent_fetch_limit: parse_var(&var, "RECENT_FETCH_LIMIT", 200usize)?,
            staff_seed_file: var("STAFF_SEED_FILE").map(PathBuf::from),
        })
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

/// Read a staff seed file: `{ "<account id>": [{ "id": "...", "name": "..." }] }`.
pub fn load_staff_seed(path: &Path) -> Result<HashMap<String, Vec<StaffMember>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read staff seed: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse staff seed: {:?}", path))
}

/// Prompt pair and sampling settings for one ingestion mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub name: String,
    pub description: String,
    pub prompts: Prompts,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompts {
    /// First extraction pass.
    pub primary: String,
    /// More directive variant used by the fallback pass.
    pub strict: String,
}

fn default_temperature() -> f32 {
    0.2
}

/// Summary of a mode for listing.
#[derive(Debug, Clone, Serialize)]
pub struct ModeInfo {
    pub name: String,
    pub description: String,
}

/// Loaded ingestion modes keyed by name.
#[derive(Debug)]
pub struct ConfigStore {
    configs: Arc<RwLock<HashMap<String, IngestConfig>>>,
}

impl ConfigStore {
    /// Load all `*.json` configs from the specified directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            anyhow::bail!("Config directory does not exist: {:?}", dir);
        }

        let mut configs = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config: {:?}", path))?;
                let config: IngestConfig = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse config: {:?}", path))?;
                info!("Loaded config: {} from {:?}", config.name, path);
                configs.push(config);
            }
        }
        Self::from_configs(configs)
    }

    /// The modes compiled into the binary.
    pub fn builtin() -> Result<Self> {
        let configs = BUILTIN_CONFIGS
            .iter()
            .map(|raw| serde_json::from_str(raw).context("Failed to parse built-in config"))
            .collect::<Result<Vec<IngestConfig>>>()?;
        Self::from_configs(configs)
    }

    /// Directory configs when present, otherwise the built-in ones.
    pub fn load_or_builtin(dir: &Path) -> Result<Self> {
        match Self::load_from_dir(dir) {
            Ok(store) => Ok(store),
            Err(e) => {
                warn!("{:#}; using built-in ingestion modes", e);
                Self::builtin()
            }
        }
    }

    pub fn from_configs(configs: Vec<IngestConfig>) -> Result<Self> {
        if configs.is_empty() {
            anyhow::bail!("No configs provided");
        }
        let map = configs.into_iter().map(|c| (c.name.clone(), c)).collect();
        Ok(Self {
            configs: Arc::new(RwLock::new(map)),
        })
    }

    pub fn get(&self, name: &str) -> Option<IngestConfig> {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// The brain dump mode if loaded, otherwise the first mode by name.
    pub fn default_config(&self) -> Option<IngestConfig> {
        self.get(DEFAULT_MODE)
            .or_else(|| self.list().first().and_then(|m| self.get(&m.name)))
    }

    /// All modes, sorted by name.
    pub fn list(&self) -> Vec<ModeInfo> {
        let mut modes: Vec<ModeInfo> = self
            .configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|c| ModeInfo {
                name: c.name.clone(),
                description: c.description.clone(),
            })
            .collect();
        modes.sort_by(|a, b| a.name.cmp(&b.name));
        modes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_defaults() {
        let config = AppConfig::from_lookup(env(&[("GEMINI_API_KEY", "k")])).unwrap();
        assert_eq!(config.gemini_model, DEFAULT_MODEL);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.recent_fetch_limit, 200);
        assert!(config.supabase.is_none());
    }

    #[test]
    fn test_env_requires_api_key() {
        assert!(AppConfig::from_lookup(env(&[])).is_err());
        assert!(AppConfig::from_lookup(env(&[("GEMINI_API_KEY", "  ")])).is_err());
    }

    #[test]
    fn test_env_supabase_needs_both_values() {
        let half = AppConfig::from_lookup(env(&[
            ("GEMINI_API_KEY", "k"),
            ("SUPABASE_URL", "https://x.supabase.co"),
        ]))
        .unwrap();
        assert!(half.supabase.is_none());

        let full = AppConfig::from_lookup(env(&[
            ("GEMINI_API_KEY", "k"),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "secret"),
            ("LLM_MAX_RETRIES", "5"),
        ]))
        .unwrap();
        assert_eq!(full.supabase.unwrap().service_role_key, "secret");
        assert_eq!(full.retry.max_retries, 5);
    }

    #[test]
    fn test_env_rejects_bad_numbers() {
        let err = AppConfig::from_lookup(env(&[
            ("GEMINI_API_KEY", "k"),
            ("RECENT_FETCH_LIMIT", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RECENT_FETCH_LIMIT"));
    }

    #[test]
    fn test_builtin_modes() {
        let store = ConfigStore::builtin().unwrap();
        let names: Vec<String> = store.list().into_iter().map(|m| m.name).collect();
        assert_eq!(names, ["brain_dump", "calendar", "meeting_minutes"]);
        assert_eq!(store.default_config().unwrap().name, DEFAULT_MODE);
        let minutes = store.get("meeting_minutes").unwrap();
        assert!(!minutes.prompts.strict.is_empty());
    }

    #[test]
    fn test_builtin_prompts_leave_tags_unset() {
        let store = ConfigStore::builtin().unwrap();
        for mode in store.list() {
            let config = store.get(&mode.name).unwrap();
            for prompt in [&config.prompts.primary, &config.prompts.strict] {
                assert!(prompt.contains("\"estimatedMinutes\": null"), "{}", mode.name);
                assert!(prompt.contains("\"energyLevel\": null"), "{}", mode.name);
                assert!(prompt.contains("\"isWeeklyWin\": null"), "{}", mode.name);
            }
        }
    }

    #[test]
    fn test_missing_dir_falls_back() {
        let store = ConfigStore::load_or_builtin(Path::new("does/not/exist")).unwrap();
        assert!(store.get("calendar").is_some());
    }

    #[test]
    fn test_default_without_brain_dump() {
        let store = ConfigStore::from_configs(vec![IngestConfig {
            name: "custom".into(),
            description: String::new(),
            prompts: Prompts {
                primary: "p".into(),
                strict: "s".into(),
            },
            temperature: default_temperature(),
        }])
        .unwrap();
        assert_eq!(store.default_config().unwrap().name, "custom");
    }
}
