//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tandem_core::{ActorId, BackendConfig};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "cli-config.json";
pub const ENV_PROFILE: &str = "TANDEM_PROFILE";
pub const ENV_ACTOR_ID: &str = "TANDEM_ACTOR_ID";
pub const ENV_CONFIG_PATH: &str = "TANDEM_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub anon_key: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub storage_bucket: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    /// Realtime broadcast topic; the library default when unset
    #[serde(default)]
    pub realtime_topic: Option<String>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> PathBuf {
    if let Some(path) = env::var_os(ENV_CONFIG_PATH) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(env::temp_dir)
        .join("tandem")
        .join(CONFIG_FILE_NAME)
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    tandem_core::util::normalize_text_option(value)
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, CliError> {
        Self::load_from_path(&default_config_path())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            CliError::Config(format!(
                "Failed to read config at {}: {error}",
                path.display()
            ))
        })?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            CliError::Config(format!(
                "Failed to parse config at {}: {error}",
                path.display()
            ))
        })?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, CliError> {
        let path = default_config_path();
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                CliError::Config(format!(
                    "Failed to create config directory {}: {error}",
                    parent.display()
                ))
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized).map_err(|error| {
            CliError::Config(format!(
                "Failed to write config at {}: {error}",
                path.display()
            ))
        })
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        if let Some(profile) = normalize_profile_name(explicit) {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(env::var(ENV_PROFILE).ok().as_deref()) {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(self.active_profile.as_deref()) {
            return profile;
        }
        "default".to_string()
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    /// Backend config from this profile, or `None` when URL or key is missing.
    pub fn backend_config(&self) -> Result<Option<BackendConfig>, CliError> {
        let (Some(url), Some(key)) = (self.backend_url.clone(), self.anon_key.clone()) else {
            return Ok(None);
        };
        Ok(Some(
            BackendConfig::new(url, key)?
                .with_access_token(self.access_token.clone())
                .with_storage_bucket(self.storage_bucket.clone()),
        ))
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.backend_url.is_none() {
            missing.push("backend_url");
        }
        if self.anon_key.is_none() {
            missing.push("anon_key");
        }
        if self.actor_id.is_none() {
            missing.push("actor_id");
        }
        missing
    }

    fn normalize(&mut self) {
        self.backend_url =
            normalize_text_option(self.backend_url.take()).map(|url| url.trim_end_matches('/').to_string());
        self.anon_key = normalize_text_option(self.anon_key.take());
        self.access_token = normalize_text_option(self.access_token.take());
        self.storage_bucket = normalize_text_option(self.storage_bucket.take());
        self.actor_id = normalize_text_option(self.actor_id.take());
        self.realtime_topic = normalize_text_option(self.realtime_topic.take());
    }
}

/// Backend and identity a sync command runs with.
#[derive(Debug, Clone)]
pub struct SyncIdentity {
    pub backend: BackendConfig,
    pub actor: ActorId,
    pub realtime_topic: Option<String>,
}

/// Environment variables win over the profile, matching `BackendConfig::from_env`.
pub fn resolve_backend(profile: Option<&CliProfile>) -> Result<BackendConfig, CliError> {
    if let Some(config) = BackendConfig::from_env()? {
        return Ok(config);
    }
    profile
        .map(CliProfile::backend_config)
        .transpose()?
        .flatten()
        .ok_or(CliError::BackendNotConfigured)
}

pub fn resolve_actor(profile: Option<&CliProfile>) -> Result<Option<ActorId>, CliError> {
    let raw = normalize_text_option(env::var(ENV_ACTOR_ID).ok())
        .or_else(|| profile.and_then(|profile| profile.actor_id.clone()));
    raw.map(ActorId::new).transpose().map_err(CliError::from)
}

pub fn resolve_identity(profile_name: Option<&str>) -> Result<SyncIdentity, CliError> {
    let config = CliProfilesConfig::load()?;
    let name = config.resolve_profile_name(profile_name);
    let profile = config.profile(&name);
    let backend = resolve_backend(profile)?;
    let actor = resolve_actor(profile)?.ok_or(CliError::ActorNotConfigured)?;
    let realtime_topic = profile.and_then(|profile| profile.realtime_topic.clone());
    tracing::debug!(profile = %name, actor = %actor, "Resolved sync identity");
    Ok(SyncIdentity {
        backend,
        actor,
        realtime_topic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_profile_name_rejects_empty() {
        assert_eq!(normalize_profile_name(None), None);
        assert_eq!(normalize_profile_name(Some(" ")), None);
    }

    #[test]
    fn config_roundtrip_preserves_profiles() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = CliProfilesConfig {
            version: 1,
            active_profile: Some(" default ".to_string()),
            profiles: BTreeMap::new(),
        };
        config.profiles.insert(
            "default".to_string(),
            CliProfile {
                backend_url: Some(" https://project.example.co/ ".to_string()),
                anon_key: Some(" anon-key ".to_string()),
                access_token: Some("   ".to_string()),
                storage_bucket: Some("avatars".to_string()),
                actor_id: Some("user-a".to_string()),
                realtime_topic: None,
            },
        );

        config.save_to_path(&path).unwrap();
        let loaded = CliProfilesConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.active_profile.as_deref(), Some("default"));
        let profile = loaded.profiles.get("default").unwrap();
        assert_eq!(
            profile.backend_url.as_deref(),
            Some("https://project.example.co")
        );
        assert_eq!(profile.anon_key.as_deref(), Some("anon-key"));
        assert_eq!(profile.access_token, None);
        assert!(profile.missing_fields().is_empty());
    }

    #[test]
    fn resolve_profile_name_prefers_explicit_then_active() {
        let config = CliProfilesConfig {
            version: 1,
            active_profile: Some("work".to_string()),
            profiles: BTreeMap::new(),
        };
        assert_eq!(config.resolve_profile_name(Some("mobile")), "mobile");
        if env::var(ENV_PROFILE).is_err() {
            assert_eq!(config.resolve_profile_name(None), "work");
        }
    }

    #[test]
    fn backend_config_requires_url_and_key() {
        let mut profile = CliProfile {
            backend_url: Some("https://project.example.co".to_string()),
            ..CliProfile::default()
        };
        assert!(profile.backend_config().unwrap().is_none());

        profile.anon_key = Some("anon".to_string());
        profile.storage_bucket = Some("avatars".to_string());
        let backend = profile.backend_config().unwrap().unwrap();
        assert_eq!(backend.storage_bucket.as_deref(), Some("avatars"));

        profile.backend_url = Some("project.example.co".to_string());
        assert!(profile.backend_config().is_err());
    }
}
