use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::debug;

use crate::models::User;

/// User file name in the data directory
const USER_FILE: &str = "user.json";

pub trait UserStorage: Send + Sync {
    fn load(&self) -> Result<Option<User>>;
    fn save(&self, user: &User) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Stores the user as JSON in a data directory.
pub struct FileUserStorage {
    data_dir: PathBuf,
}

impl FileUserStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn user_path(&self) -> PathBuf {
        self.data_dir.join(USER_FILE)
    }
}

impl UserStorage for FileUserStorage {
    fn load(&self) -> Result<Option<User>> {
        let path = self.user_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read stored user")?;
        let user: User = serde_json::from_str(&contents).context("Failed to parse stored user")?;
        debug!(user_id = user.id, "Loaded stored user");
        Ok(Some(user))
    }

    fn save(&self, user: &User) -> Result<()> {
        let path = self.user_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(user)?;
        std::fs::write(&path, contents).context("Failed to write stored user")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.user_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Non-durable storage, for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryUserStorage {
    user: Mutex<Option<User>>,
}

impl MemoryUserStorage {
    pub fn with_user(user: User) -> Self {
        Self {
            user: Mutex::new(Some(user)),
        }
    }
}

impl UserStorage for MemoryUserStorage {
    fn load(&self) -> Result<Option<User>> {
        Ok(self
            .user
            .lock()
            .map_err(|_| anyhow::anyhow!("user storage lock poisoned"))?
            .clone())
    }

    fn save(&self, user: &User) -> Result<()> {
        *self
            .user
            .lock()
            .map_err(|_| anyhow::anyhow!("user storage lock poisoned"))? = Some(user.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self
            .user
            .lock()
            .map_err(|_| anyhow::anyhow!("user storage lock poisoned"))? = None;
        Ok(())
    }
}
