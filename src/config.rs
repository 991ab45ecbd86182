use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_CONFIG_PATH: &str = "MELODIST_CONFIG_PATH";
const ENV_API_URL: &str = "MELODIST_API_URL";
const ENV_ARTIFACT_DIR: &str = "MELODIST_ARTIFACT_DIR";
const ENV_AUTH_TOKEN: &str = "MELODIST_AUTH_TOKEN";

#[derive(Debug, Clone)]
pub struct AppConfig {
    api_url: Option<String>,
    artifact_dir: PathBuf,
    auth_token: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = Self::default_config_path() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create config directory {}", parent.display())
                })?;
            }
        }

        if let Some(path) = config_file_override()? {
            if path.exists() {
                let partial = read_partial(&path)?;
                config.apply_partial(partial);
            }
        } else {
            let path = Self::default_config_path()?;
            if path.exists() {
                let partial = read_partial(&path)?;
                config.apply_partial(partial);
            }
        }

        config.apply_env();
        Ok(config)
    }

    pub fn api_url(&self) -> Option<&str> {
        self.api_url.as_deref()
    }

    pub fn artifact_dir(&self) -> &PathBuf {
        &self.artifact_dir
    }

    /// Bearer token for the auth collaborator. Absence means the session is
    /// anonymous; the pipeline endpoints themselves are unauthenticated.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "Melodist", "Melodist")
            .ok_or_else(|| anyhow!("unable to determine config directory"))?;
        Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(url) = partial.api_url {
            self.api_url = Some(url);
        }
        if let Some(dir) = partial.artifact_dir {
            self.artifact_dir = dir;
        }
        if let Some(token) = partial.auth_token {
            self.auth_token = Some(token);
        }
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var(ENV_API_URL) {
            if value.trim().is_empty() {
                self.api_url = None;
            } else {
                self.api_url = Some(value);
            }
        }
        if let Ok(value) = env::var(ENV_ARTIFACT_DIR) {
            if !value.trim().is_empty() {
                self.artifact_dir = PathBuf::from(value);
            }
        }
        if let Ok(value) = env::var(ENV_AUTH_TOKEN) {
            if !value.trim().is_empty() {
                self.auth_token = Some(value);
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { api_url: None, artifact_dir: default_artifact_dir(), auth_token: None }
    }
}

fn config_file_override() -> Result<Option<PathBuf>> {
    if let Some(value) = env::var_os(ENV_CONFIG_PATH) {
        if value.is_empty() {
            return Ok(None);
        }
        let path = PathBuf::from(value);
        if path.is_file() {
            return Ok(Some(path));
        }
        if path.ends_with(CONFIG_FILE_NAME) {
            return Ok(Some(path));
        }
        if path.is_dir() {
            return Ok(Some(path.join(CONFIG_FILE_NAME)));
        }
        return Ok(Some(path));
    }
    Ok(None)
}

fn read_partial(path: &Path) -> Result<PartialConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let partial: PartialConfig =
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(partial)
}

fn default_artifact_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join("Music").join("Melodist"))
        .unwrap_or_else(|| PathBuf::from("./artifacts"))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialConfig {
    api_url: Option<String>,
    artifact_dir: Option<PathBuf>,
    auth_token: Option<String>,
}
