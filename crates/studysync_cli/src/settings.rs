//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow, lowest priority first:
//! 1. Compiled [`StudySettings::default()`]
//! 2. `settings/default_config.json`, deep-merged over the defaults
//! 3. `study_configs/<study>.json`, deep-merged over the result
//! 4. `STUDYSYNC_*` environment overrides
//!
//! `${VAR}` references in string values of either file are expanded from
//! the environment before merging. The API key has its own precedence, see
//! [`SettingsLoader::load`]. Settings are resolved once per command and
//! handed to the library crates as plain config structs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use studysync_client::{ApiKey, ClientConfig, RetryConfig, DEFAULT_BASE_URL};
use studysync_engine::SyncConfig;
use studysync_protocol::is_valid_study_name;
use studysync_store::{Organization, StorageFormat, StoreConfig};
use thiserror::Error;
use tracing::{debug, warn};

/// Default config file, relative to the settings root.
pub const DEFAULT_CONFIG_FILE: &str = "settings/default_config.json";
/// Template for new study config files, relative to the settings root.
pub const TEMPLATE_FILE: &str = "settings/config_template.json";
/// Directory of per-study config files, relative to the settings root.
pub const STUDY_CONFIG_DIR: &str = "study_configs";
/// Fallback API key variable.
pub const API_KEY_VAR: &str = "STUDYSYNC_API_KEY";

const MAX_PAGE_SIZE: u64 = 100_000;
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Errors raised while resolving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A config file could not be read or written.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A config file is not valid JSON.
    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A setting has an unusable value.
    #[error("invalid setting: {0}")]
    Invalid(String),

    /// No API key was found in any source.
    #[error("no API key for '{study}': set {env_var} or api.api_key in its config file")]
    MissingApiKey {
        /// Study name, empty for commands without a study.
        study: String,
        /// Most specific variable that would have been used.
        env_var: String,
    },

    /// `create-config` would overwrite a file.
    #[error("config file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
}

/// Result type for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Source of environment variables.
pub trait Env {
    /// Returns the variable if it is set and not blank.
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

impl Env for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.trim().is_empty()).cloned()
    }
}

/// Fully resolved settings for one study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudySettings {
    /// Study the settings were resolved for; empty for global commands.
    pub study_name: String,
    /// Remote API settings.
    pub api: ApiSettings,
    /// Paging settings.
    pub download: DownloadSettings,
    /// Local storage settings.
    pub storage: StorageSettings,
}

/// `api` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Base URL of the events API.
    pub base_url: String,
    /// Bearer credential.
    pub api_key: String,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First retry delay in seconds.
    pub retry_delay: f64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout: 30,
            max_retries: 3,
            retry_delay: 1.0,
        }
    }
}

/// `download` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Events per page.
    pub default_page_size: u32,
    /// Parallel page requests during a full download.
    pub max_concurrent_requests: usize,
    /// Page bound per run.
    pub max_pages: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            default_page_size: sync.page_size,
            max_concurrent_requests: sync.max_concurrent_requests,
            max_pages: sync.max_pages,
        }
    }
}

/// `storage` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding one subdirectory per study.
    pub data_directory: PathBuf,
    /// Format for newly downloaded studies.
    pub default_format: StorageFormat,
    /// `by_study`, `by_date`, `by_user_id` or `by_event_type`.
    pub organization_mode: String,
    /// Up to two partition levels; overrides `organization_mode` when set.
    pub folder_structure: Vec<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data"),
            default_format: StorageFormat::default(),
            organization_mode: "by_study".to_string(),
            folder_structure: Vec::new(),
        }
    }
}

impl Default for StudySettings {
    fn default() -> Self {
        Self {
            study_name: String::new(),
            api: ApiSettings::default(),
            download: DownloadSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl StudySettings {
    /// The file organization selected by `folder_structure` or `organization_mode`.
    pub fn organization(&self) -> SettingsResult<Organization> {
        let mode = if self.storage.folder_structure.is_empty() {
            self.storage.organization_mode.clone()
        } else {
            self.storage.folder_structure.join("/")
        };
        mode.parse::<Organization>()
            .map_err(|e| SettingsError::Invalid(format!("storage organization: {e}")))
    }

    /// Client configuration.
    ///
    /// `known_studies` is what `remote` falls back to when the API has no
    /// study listing.
    pub fn client_config(&self, known_studies: Vec<String>) -> SettingsResult<ClientConfig> {
        if self.api.api_key.trim().is_empty() {
            return Err(SettingsError::MissingApiKey {
                study: self.study_name.clone(),
                env_var: api_key_var(&self.study_name),
            });
        }
        let retry_delay = Duration::try_from_secs_f64(self.api.retry_delay)
            .map_err(|e| SettingsError::Invalid(format!("api.retry_delay: {e}")))?;
        let retry = RetryConfig::new(self.api.max_retries).with_retry_delay(retry_delay);

        let config = ClientConfig::new(self.api.base_url.clone(), ApiKey::new(self.api.api_key.clone()))
            .with_timeout(Duration::from_secs(self.api.timeout))
            .with_retry(retry)
            .with_known_studies(known_studies);
        config
            .validate()
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        Ok(config)
    }

    /// Sync engine configuration.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new()
            .with_page_size(self.download.default_page_size)
            .with_max_concurrent_requests(self.download.max_concurrent_requests)
            .with_max_pages(self.download.max_pages)
    }

    /// Local store configuration.
    pub fn store_config(&self) -> SettingsResult<StoreConfig> {
        Ok(StoreConfig::new(self.storage.data_directory.clone())
            .with_format(self.storage.default_format)
            .with_organization(self.organization()?))
    }
}

/// Name of the study-specific API key variable: `demo-study` reads
/// `STUDYSYNC_API_KEY_DEMO_STUDY`.
pub fn api_key_var(study: &str) -> String {
    if study.is_empty() {
        API_KEY_VAR.to_string()
    } else {
        format!("{API_KEY_VAR}_{}", study.to_uppercase().replace('-', "_"))
    }
}

/// Resolves settings from files under a root directory and an environment.
#[derive(Debug, Clone)]
pub struct SettingsLoader<E = ProcessEnv> {
    root: PathBuf,
    env: E,
}

impl SettingsLoader<ProcessEnv> {
    /// Loader reading the process environment.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_env(root, ProcessEnv)
    }
}

impl<E: Env> SettingsLoader<E> {
    /// Loader reading `env` instead of the process environment.
    pub fn with_env(root: impl Into<PathBuf>, env: E) -> Self {
        Self {
            root: root.into(),
            env,
        }
    }

    /// Path of the default config file.
    pub fn default_config_path(&self) -> PathBuf {
        self.root.join(DEFAULT_CONFIG_FILE)
    }

    /// Path of a study's config file.
    pub fn study_config_path(&self, study: &str) -> PathBuf {
        self.root
            .join(STUDY_CONFIG_DIR)
            .join(format!("{study}.json"))
    }

    /// Resolves the settings for `study`, or the global settings.
    ///
    /// The API key is taken from the first non-empty source of:
    /// `STUDYSYNC_API_KEY_<STUDY>`, the study file's `api.api_key`,
    /// `STUDYSYNC_API_KEY`, the default file's `api.api_key`.
    pub fn load(&self, study: Option<&str>) -> SettingsResult<StudySettings> {
        if let Some(study) = study {
            check_study_name(study)?;
        }

        let default_file = self.read_layer(&self.default_config_path())?;
        let study_file = match study {
            Some(study) => self.read_layer(&self.study_config_path(study))?,
            None => None,
        };

        let mut merged = serde_json::to_value(StudySettings::default())
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        for layer in [&default_file, &study_file].into_iter().flatten() {
            merged = deep_merge(merged, layer.clone());
        }
        let mut settings: StudySettings =
            serde_json::from_value(merged).map_err(|e| SettingsError::Invalid(e.to_string()))?;

        settings.study_name = study.unwrap_or_default().to_string();
        self.apply_env_overrides(&mut settings);
        settings.api.api_key = self
            .resolve_api_key(study, study_file.as_ref(), default_file.as_ref())
            .unwrap_or_default();

        if settings.storage.data_directory.is_relative() {
            settings.storage.data_directory = self.root.join(&settings.storage.data_directory);
        }
        Ok(settings)
    }

    /// Reads a study's config file with `${VAR}` references expanded.
    pub fn read_study_file(&self, study: &str) -> SettingsResult<Option<Value>> {
        check_study_name(study)?;
        self.read_layer(&self.study_config_path(study))
    }

    /// Names of the studies with a config file, sorted.
    pub fn study_config_names(&self) -> SettingsResult<Vec<String>> {
        let dir = self.root.join(STUDY_CONFIG_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(SettingsError::Io { path: dir, source }),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SettingsError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if is_valid_study_name(stem) && stem != "config_template" && stem != "default_config" {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Writes a new study config file from the template.
    ///
    /// Uses `settings/config_template.json` when present, otherwise the
    /// compiled defaults. Never overwrites an existing file.
    pub fn create_study_config(&self, study: &str) -> SettingsResult<PathBuf> {
        check_study_name(study)?;
        let path = self.study_config_path(study);

        let template_path = self.root.join(TEMPLATE_FILE);
        let mut config = match read_json(&template_path)? {
            Some(template) => template,
            None => serde_json::to_value(StudySettings::default())
                .map_err(|e| SettingsError::Invalid(e.to_string()))?,
        };
        let Value::Object(fields) = &mut config else {
            return Err(SettingsError::Invalid(format!(
                "{} must contain a JSON object",
                template_path.display()
            )));
        };
        fields.insert("study_name".to_string(), Value::String(study.to_string()));

        let io_err = |source| SettingsError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SettingsError::AlreadyExists(path.clone()))
            }
            Err(e) => return Err(io_err(e)),
        };
        let text = serde_json::to_string_pretty(&config)
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        file.write_all(text.as_bytes()).map_err(io_err)?;
        file.write_all(b"\n").map_err(io_err)?;
        debug!(study, path = %path.display(), "created study config");
        Ok(path)
    }

    fn read_layer(&self, path: &Path) -> SettingsResult<Option<Value>> {
        Ok(read_json(path)?.map(|value| expand_env_refs(value, &self.env)))
    }

    fn resolve_api_key(
        &self,
        study: Option<&str>,
        study_file: Option<&Value>,
        default_file: Option<&Value>,
    ) -> Option<String> {
        study
            .and_then(|s| self.env.var(&api_key_var(s)))
            .or_else(|| study_file.and_then(file_api_key))
            .or_else(|| self.env.var(API_KEY_VAR))
            .or_else(|| default_file.and_then(file_api_key))
    }

    /// Applies `STUDYSYNC_*` overrides; invalid values are ignored.
    fn apply_env_overrides(&self, settings: &mut StudySettings) {
        if let Some(v) = self.env.var("STUDYSYNC_BASE_URL") {
            settings.api.base_url = v;
        }
        if let Some(v) = self.env.var("STUDYSYNC_DATA_DIR") {
            settings.storage.data_directory = PathBuf::from(v);
        }
        if let Some(v) = self.env.var("STUDYSYNC_FORMAT") {
            match v.parse::<StorageFormat>() {
                Ok(format) => settings.storage.default_format = format,
                Err(_) => warn!(key = "STUDYSYNC_FORMAT", value = %v, "invalid storage format env var, ignoring"),
            }
        }
        if let Some(v) = self.read_env_u64("STUDYSYNC_PAGE_SIZE", 1, MAX_PAGE_SIZE) {
            settings.download.default_page_size = v as u32;
        }
        if let Some(v) = self.read_env_u64("STUDYSYNC_TIMEOUT_SECS", 1, MAX_TIMEOUT_SECS) {
            settings.api.timeout = v;
        }
    }

    fn read_env_u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.env.var(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

fn check_study_name(study: &str) -> SettingsResult<()> {
    if is_valid_study_name(study) {
        Ok(())
    } else {
        Err(SettingsError::Invalid(format!(
            "invalid study name '{study}': use lowercase words separated by hyphens"
        )))
    }
}

fn read_json(path: &Path) -> SettingsResult<Option<Value>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found");
            return Ok(None);
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let value = serde_json::from_str(&text).map_err(|source| SettingsError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded config file");
    Ok(Some(value))
}

/// The non-blank `api.api_key` of a config layer.
pub fn file_api_key(layer: &Value) -> Option<String> {
    layer
        .pointer("/api/api_key")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Expands `${VAR}` in every string of `value`. Unset variables expand to "".
pub fn expand_env_refs(value: Value, env: &dyn Env) -> Value {
    match value {
        Value::String(s) => Value::String(expand_str(&s, env)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| expand_env_refs(v, env)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_env_refs(v, env)))
                .collect(),
        ),
        other => other,
    }
}

fn expand_str(input: &str, env: &dyn Env) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&env.var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference, keep it literally.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
