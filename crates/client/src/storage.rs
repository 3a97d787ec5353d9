//! Local persistent storage.
//!
//! Values are JSON files in the platform-appropriate config directory:
//!   - Linux: `~/.config/calibra/`
//!   - macOS: `~/Library/Application Support/calibra/`
//!   - Windows: `%APPDATA%\calibra\`
//!
//! The only value the realtime client reads is the access token, which is
//! looked up every time a socket URL is built and never refreshed mid-connection.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

/// Key under which the access token is stored.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// A directory of JSON values addressed by key.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Storage rooted in the platform config directory.
    pub fn platform() -> Option<Self> {
        let root = dirs::config_dir()?.join("calibra");
        Some(Self { root })
    }

    /// Storage rooted in an explicit directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Save a value. Returns `true` if the operation succeeded.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.save_raw(key, &json),
            Err(_) => false,
        }
    }

    /// Load a value.
    ///
    /// Returns `None` if the key doesn't exist or deserialization fails.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.load_raw(key)?;
        serde_json::from_str(&json).ok()
    }

    pub fn remove(&self, key: &str) {
        if let Some(path) = self.file_path(key) {
            let _ = std::fs::remove_file(path);
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.load_raw(key).is_some()
    }

    /// The stored access token, if any. Blank tokens count as missing.
    pub fn access_token(&self) -> Option<String> {
        self.load::<String>(ACCESS_TOKEN_KEY)
            .filter(|token| !token.trim().is_empty())
    }

    pub fn set_access_token(&self, token: &str) -> bool {
        self.save(ACCESS_TOKEN_KEY, &token)
    }

    fn file_path(&self, key: &str) -> Option<PathBuf> {
        if key.is_empty() {
            return None;
        }
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        Some(self.root.join(format!("{}.json", safe_key)))
    }

    fn save_raw(&self, key: &str, value: &str) -> bool {
        let Some(path) = self.file_path(key) else {
            return false;
        };
        if std::fs::create_dir_all(&self.root).is_err() {
            return false;
        }
        std::fs::write(path, value).is_ok()
    }

    fn load_raw(&self, key: &str) -> Option<String> {
        let path = self.file_path(key)?;
        std::fs::read_to_string(path).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage(name: &str) -> Storage {
        let mut dir = std::env::temp_dir();
        dir.push(format!("calibra-storage-{}-{}", name, uuid::Uuid::new_v4()));
        Storage::at(dir)
    }

    #[test]
    fn token_round_trips_through_disk() {
        let storage = temp_storage("token");
        assert_eq!(storage.access_token(), None);

        assert!(storage.set_access_token("abc.def"));
        assert_eq!(storage.access_token().as_deref(), Some("abc.def"));
        assert!(storage.exists(ACCESS_TOKEN_KEY));

        storage.remove(ACCESS_TOKEN_KEY);
        assert_eq!(storage.access_token(), None);
        let _ = std::fs::remove_dir_all(storage.root());
    }

    #[test]
    fn blank_token_is_missing() {
        let storage = temp_storage("blank");
        storage.set_access_token("   ");
        assert_eq!(storage.access_token(), None);
        let _ = std::fs::remove_dir_all(storage.root());
    }

    #[test]
    fn keys_are_sanitized() {
        let storage = Storage::at("/tmp/x");
        assert_eq!(
            storage.file_path("a/b:c"),
            Some(PathBuf::from("/tmp/x/a_b_c.json"))
        );
        assert_eq!(storage.file_path(""), None);
    }
}
