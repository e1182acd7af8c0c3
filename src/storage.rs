//! Persistence of cached tokens and device secrets.
//!
//! The backing store is injected: anything string-keyed works. No encryption
//! happens at this layer; the store is trusted to the degree the OS
//! filesystem is.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::constant::STORAGE_PREFIX;
use crate::error::AuthError;
use crate::token::{Jwt, Session};

/// String-keyed key/value persistence consumed by the token cache.
pub trait Storage: Send + Sync {
    fn set_item(&self, key: &str, value: &str) -> Result<(), AuthError>;
    fn get_item(&self, key: &str) -> Result<Option<String>, AuthError>;
    fn remove_item(&self, key: &str) -> Result<(), AuthError>;
}

/// Process-local storage. The default for tests and for callers that opt out
/// of persistence.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn set_item(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.map.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn remove_item(&self, key: &str) -> Result<(), AuthError> {
        self.map.lock().remove(key);
        Ok(())
    }
}

/// Filesystem-backed storage: one JSON object per file, rewritten on every
/// mutation.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    map: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Open (or create) the backing file at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref().to_path_buf();
        let map = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|err| {
                AuthError::Corruption(format!("storage file {}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    fn persist(&self, map: &HashMap<String, String>) -> Result<(), AuthError> {
        let contents =
            serde_json::to_string(map).map_err(|err| AuthError::Corruption(err.to_string()))?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn set_item(&self, key: &str, value: &str) -> Result<(), AuthError> {
        let mut map = self.map.lock();
        map.insert(key.to_string(), value.to_string());
        self.persist(&map)
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn remove_item(&self, key: &str) -> Result<(), AuthError> {
        let mut map = self.map.lock();
        map.remove(key);
        self.persist(&map)
    }
}

/// Device secrets persisted after a successful device confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMaterial {
    pub device_key: String,
    pub device_group_key: String,
    pub random_password: String,
}

/// The deterministic key schema over an injected [`Storage`].
///
/// Writes happen at three moments only: terminal authentication, device
/// confirmation, and sign-out/forget-device removals.
pub(crate) struct TokenStore {
    storage: Arc<dyn Storage>,
    client_id: String,
}

impl TokenStore {
    pub(crate) fn new(storage: Arc<dyn Storage>, client_id: &str) -> Self {
        Self {
            storage,
            client_id: client_id.to_string(),
        }
    }

    fn key(&self, username: &str, leaf: &str) -> String {
        format!("{STORAGE_PREFIX}.{}.{username}.{leaf}", self.client_id)
    }

    fn last_user_key(&self) -> String {
        format!("{STORAGE_PREFIX}.{}.LastAuthUser", self.client_id)
    }

    pub(crate) fn cache_tokens(&self, username: &str, session: &Session) -> Result<(), AuthError> {
        debug!(username = username; "Caching session tokens");
        self.storage
            .set_item(&self.key(username, "idToken"), session.id_token().as_str())?;
        self.storage.set_item(
            &self.key(username, "accessToken"),
            session.access_token().as_str(),
        )?;
        self.storage.set_item(
            &self.key(username, "refreshToken"),
            session.refresh_token(),
        )?;
        self.storage.set_item(&self.last_user_key(), username)
    }

    /// Rebuild a session from the cache. `None` when any of the three tokens
    /// is missing.
    pub(crate) fn load_tokens(&self, username: &str) -> Result<Option<Session>, AuthError> {
        let id = self.storage.get_item(&self.key(username, "idToken"))?;
        let access = self.storage.get_item(&self.key(username, "accessToken"))?;
        let refresh = self.storage.get_item(&self.key(username, "refreshToken"))?;

        Ok(match (id, access, refresh) {
            (Some(id), Some(access), Some(refresh)) => {
                Some(Session::new(Jwt::new(id), Jwt::new(access), refresh))
            }
            _ => None,
        })
    }

    /// Best-effort removal; failures are logged, not surfaced.
    pub(crate) fn clear_tokens(&self, username: &str) {
        for leaf in ["idToken", "accessToken", "refreshToken"] {
            if let Err(err) = self.storage.remove_item(&self.key(username, leaf)) {
                warn!(username = username, error = err.to_string().as_str(); "Failed to clear cached token");
            }
        }
        if let Err(err) = self.storage.remove_item(&self.last_user_key()) {
            warn!(error = err.to_string().as_str(); "Failed to clear last authenticated user");
        }
    }

    pub(crate) fn cache_device(
        &self,
        username: &str,
        device: &DeviceMaterial,
    ) -> Result<(), AuthError> {
        debug!(username = username, device_key = device.device_key.as_str(); "Caching device secrets");
        self.storage
            .set_item(&self.key(username, "deviceKey"), &device.device_key)?;
        self.storage.set_item(
            &self.key(username, "deviceGroupKey"),
            &device.device_group_key,
        )?;
        self.storage.set_item(
            &self.key(username, "randomPasswordKey"),
            &device.random_password,
        )
    }

    pub(crate) fn load_device(&self, username: &str) -> Result<Option<DeviceMaterial>, AuthError> {
        let device_key = self.storage.get_item(&self.key(username, "deviceKey"))?;
        let group_key = self
            .storage
            .get_item(&self.key(username, "deviceGroupKey"))?;
        let password = self
            .storage
            .get_item(&self.key(username, "randomPasswordKey"))?;

        Ok(match (device_key, group_key, password) {
            (Some(device_key), Some(device_group_key), Some(random_password)) => {
                Some(DeviceMaterial {
                    device_key,
                    device_group_key,
                    random_password,
                })
            }
            _ => None,
        })
    }

    pub(crate) fn clear_device(&self, username: &str) {
        for leaf in ["deviceKey", "deviceGroupKey", "randomPasswordKey"] {
            if let Err(err) = self.storage.remove_item(&self.key(username, leaf)) {
                warn!(username = username, error = err.to_string().as_str(); "Failed to clear cached device secret");
            }
        }
    }

    pub(crate) fn last_auth_user(&self) -> Result<Option<String>, AuthError> {
        self.storage.get_item(&self.last_user_key())
    }
}
