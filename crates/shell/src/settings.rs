use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use mirror_llm::{DEFAULT_CHAT_MODEL, ProviderConfig};
use mirror_session::persona;

pub const DEFAULT_PROVIDER_ID: &str = "deepseek";
pub const DEFAULT_ENDPOINT: &str = "https://api.deepseek.com";
pub const SETTINGS_DIRECTORY_NAME: &str = "mirror";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const TOKENS_FILE_NAME: &str = "tokens.json";
pub const DATABASE_FILE_NAME: &str = "conversations.db";

/// Environment fallback for the provider credential.
pub const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";
pub const MODEL_ENV: &str = "MIRROR_MODEL";
pub const ENDPOINT_ENV: &str = "MIRROR_BASE_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub database_path: String,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            temperature: default_temperature(),
            database_path: String::new(),
        }
    }
}

impl ShellSettings {
    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if self.api_key.trim().is_empty() {
            return None;
        }

        Some(ProviderConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
        ))
    }

    pub fn database_location(&self) -> PathBuf {
        if self.database_path.trim().is_empty() {
            default_config_dir().join(DATABASE_FILE_NAME)
        } else {
            PathBuf::from(self.database_path.trim())
        }
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_string()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };
        self.model = if self.model.trim().is_empty() {
            default_model()
        } else {
            self.model.trim().to_string()
        };
        self.database_path = self.database_path.trim().to_string();

        self
    }

    // Environment variables fill gaps the settings file leaves open; a key
    // that is already configured on disk wins over the environment.
    pub fn with_environment_overlay(mut self) -> Self {
        if self.api_key.is_empty()
            && let Some(api_key) = non_empty_env(API_KEY_ENV)
        {
            self.api_key = api_key;

            if let Some(model) = non_empty_env(MODEL_ENV) {
                self.model = model;
            }
            if let Some(endpoint) = non_empty_env(ENDPOINT_ENV) {
                self.endpoint = endpoint;
            }
        }

        self
    }
}

/// Settings persistence with atomic replace-on-write, held behind an
/// `ArcSwap` so readers never observe a partially applied update.
pub struct SettingsStore {
    settings: Arc<ArcSwap<ShellSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_path() -> PathBuf {
        default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        let store = Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        };

        // Seed the settings file on first run so there is something concrete
        // to edit when configuring the API key. Defaults only: environment
        // credentials never land on disk.
        if !store.config_path.exists()
            && let Err(error) = store.persist(&ShellSettings::default())
        {
            tracing::warn!("failed to seed default settings file: {}", error);
        }

        store
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<ShellSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ShellSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> ShellSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return ShellSettings::default().with_environment_overlay();
        }

        let figment =
            Figment::from(Serialized::defaults(ShellSettings::default())).merge(Json::file(path));

        match figment.extract::<ShellSettings>() {
            Ok(settings) => settings.normalized().with_environment_overlay(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ShellSettings::default().with_environment_overlay()
            }
        }
    }

    fn persist(&self, settings: &ShellSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".mirror"))
}

pub fn default_tokens_path() -> PathBuf {
    default_config_dir().join(TOKENS_FILE_NAME)
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_temperature() -> f64 {
    persona::DEFAULT_TEMPERATURE
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
