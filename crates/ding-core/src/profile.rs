//! Named DingTalk destinations and the live, swappable table that holds them.
//!
//! A [`ProfileTable`] is built wholesale from a configuration document and is
//! never mutated afterwards. [`ProfileStore`] owns the active table and swaps
//! it atomically on reload; readers take an `Arc` snapshot and keep using it
//! for the rest of their request even if a reload lands meanwhile.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("no dingtalk profiles provided in config")]
    NoProfiles,
    #[error("profile name cannot be empty")]
    EmptyName,
    #[error("webhook url of profile {profile:?} cannot be empty")]
    EmptyUrl { profile: String },
    #[error("invalid webhook url for profile {profile:?}: {reason}")]
    InvalidUrl { profile: String, reason: String },
    #[error("duplicate profile {0:?} after trimming")]
    Duplicate(String),
    #[error("profile store has no backing file to reload from")]
    NoSource,
}

#[derive(Debug, Error)]
#[error("profile {0:?} not found")]
pub struct ProfileNotFound(pub String);

/// Document syntax of a profile configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml") => {
                Self::Yaml
            }
            _ => Self::Toml,
        }
    }
}

/// Who to `@` in every message sent through a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Mention {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub mobiles: Vec<String>,
}

impl Mention {
    pub fn is_empty(&self) -> bool {
        !self.all && self.mobiles.is_empty()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub url: Url,
    /// Robot signing secret; when set, requests carry `timestamp` and `sign`.
    pub secret: Option<String>,
    pub mention: Option<Mention>,
}

impl Profile {
    pub fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }
}

/// A webhook URL without its query string, which carries the access token.
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    u.set_query(None);
    u.to_string()
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("url", &self.redacted_url())
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("mention", &self.mention)
            .finish()
    }
}

/// A profile value in the document: either a bare URL or `{ url, secret, mention }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ProfileEntry {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        secret: Option<String>,
        #[serde(default)]
        mention: Option<Mention>,
    },
}

#[derive(Debug, Deserialize)]
struct ProfileDocument {
    #[serde(default)]
    profiles: Option<BTreeMap<String, ProfileEntry>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTable {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileTable {
    /// Parses and validates a whole document. Any malformed entry fails the
    /// load; a partially valid table is never returned.
    pub fn load(raw: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let doc: ProfileDocument = match format {
            ConfigFormat::Toml => {
                toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            ConfigFormat::Yaml => {
                serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
        };

        let entries = doc.profiles.ok_or(ConfigError::NoProfiles)?;
        if entries.is_empty() {
            return Err(ConfigError::NoProfiles);
        }

        let mut profiles = BTreeMap::new();
        for (name, entry) in entries {
            let profile = validate_entry(&name, entry)?;
            if profiles.contains_key(&profile.name) {
                return Err(ConfigError::Duplicate(profile.name));
            }
            profiles.insert(profile.name.clone(), profile);
        }

        Ok(Self { profiles })
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load(&raw, ConfigFormat::from_path(path))
    }

    pub fn lookup(&self, name: &str) -> Result<&Profile, ProfileNotFound> {
        self.profiles
            .get(name)
            .ok_or_else(|| ProfileNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn validate_entry(name: &str, entry: ProfileEntry) -> Result<Profile, ConfigError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::EmptyName);
    }

    let (raw_url, secret, mention) = match entry {
        ProfileEntry::Url(url) => (url, None, None),
        ProfileEntry::Detailed {
            url,
            secret,
            mention,
        } => (url, secret, mention),
    };

    let raw_url = raw_url.trim();
    if raw_url.is_empty() {
        return Err(ConfigError::EmptyUrl {
            profile: name.to_string(),
        });
    }

    let url = Url::parse(raw_url).map_err(|e| ConfigError::InvalidUrl {
        profile: name.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl {
            profile: name.to_string(),
            reason: format!("unsupported scheme {:?}", url.scheme()),
        });
    }

    let secret = secret
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let mention = mention.filter(|m| !m.is_empty());

    Ok(Profile {
        name: name.to_string(),
        url,
        secret,
        mention,
    })
}

/// Shared handle to the active [`ProfileTable`].
#[derive(Debug, Clone)]
pub struct ProfileStore {
    current: Arc<RwLock<Arc<ProfileTable>>>,
    source: Option<PathBuf>,
    reload_lock: Arc<Mutex<()>>,
}

impl ProfileStore {
    pub fn new(table: ProfileTable) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(table))),
            source: None,
            reload_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Loads the initial table from `path` and remembers it for [`reload`](Self::reload).
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let table = ProfileTable::load_file(&path)?;
        Ok(Self::new(table).with_source(path))
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The table as of now. Later replacements do not affect the returned value.
    pub async fn snapshot(&self) -> Arc<ProfileTable> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn replace(&self, table: ProfileTable) {
        let table = Arc::new(table);
        *self.current.write().await = table;
    }

    /// Re-reads the backing file and swaps the table in only if it loads
    /// cleanly. Concurrent reloads queue behind each other.
    pub async fn reload(&self) -> Result<Arc<ProfileTable>, ConfigError> {
        let path = self.source.as_ref().ok_or(ConfigError::NoSource)?;
        let _guard = self.reload_lock.lock().await;

        debug!(path = %path.display(), "Reloading profile configuration");
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
        let table = Arc::new(ProfileTable::load(&raw, ConfigFormat::from_path(path))?);

        *self.current.write().await = Arc::clone(&table);
        info!(
            path = %path.display(),
            profiles = ?table.names().collect::<Vec<_>>(),
            "Profile configuration reloaded"
        );
        Ok(table)
    }
}
