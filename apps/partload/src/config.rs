//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/partload/partload.toml`
//! - Windows: `%APPDATA%/partload/partload.toml`

use std::path::{Path, PathBuf};

use partload_uploader::{UploadRequest, UploaderConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Environment variable that overrides `auth_token`.
pub const AUTH_TOKEN_ENV: &str = "PARTLOAD_AUTH_TOKEN";

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// START endpoint. Part URL and COMPLETE paths are resolved against its origin.
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// Bearer token sent on every backend call.
    #[serde(default)]
    pub auth_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,

    /// MIME type override. `application/octet-stream` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Extra START fields, forwarded verbatim.
    #[serde(default)]
    pub endpoint_params: Map<String, Value>,

    #[serde(default)]
    pub upload: UploaderConfig,
}

fn default_api_endpoint() -> String {
    "http://localhost:8080/api/data/upload/multipart/start".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            auth_token: String::new(),
            submission_id: None,
            content_type: None,
            endpoint_params: Map::new(),
            upload: UploaderConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&config_path()?)?;
        if let Ok(token) = std::env::var(AUTH_TOKEN_ENV) {
            if !token.is_empty() {
                config.auth_token = token;
            }
        }
        Ok(config)
    }

    /// Loads `path`, writing defaults there when it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.upload.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The file holds a bearer token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Builds the per-upload request from the configured metadata.
    pub fn upload_request(&self) -> UploadRequest {
        UploadRequest {
            content_type: self.content_type.clone(),
            submission_id: self.submission_id.clone(),
            endpoint_params: self.endpoint_params.clone(),
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("partload")
            .join("partload.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("partload").join("partload.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/partload/partload.toml"))
    }
}
