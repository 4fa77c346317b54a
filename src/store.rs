//! Application store: profile, memories and the companion conversation
//!
//! Every mutation is written through to a JSON file per key under the data
//! directory. Files are read once when the store is opened; a missing or
//! unreadable file falls back to the empty default.

use crate::error::{Result, VoiceError};
use crate::session::{CompanionTag, ConversationMessage};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const PROFILE_KEY: &str = "eldermama_user_profile";
pub const MEMORIES_KEY: &str = "eldermama_memories";
pub const COMPANION_MESSAGES_KEY: &str = "eldermama_companion_messages";
pub const COMPANION_TAGS_KEY: &str = "eldermama_companion_tags";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introvert_extrovert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobility_level: Option<String>,
}

impl UserProfile {
    /// Name to address the user by
    pub fn display_name(&self) -> &str {
        match self.preferred_name.as_deref() {
            Some(preferred) if !preferred.trim().is_empty() => preferred,
            _ => &self.name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Person,
    Fact,
    Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub kind: MemoryKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a memory; id and timestamp are assigned
#[derive(Debug, Clone, Deserialize)]
pub struct NewMemory {
    pub kind: MemoryKind,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryUpdate {
    pub kind: Option<MemoryKind>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// One JSON file per key
#[derive(Debug, Clone)]
pub struct JsonStorage {
    dir: PathBuf,
}

impl JsonStorage {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Read a value, falling back to the default when absent or corrupt
    pub fn read<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let path = self.path(key);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return T::default();
            }
        };

        match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring corrupt store file {}: {}", path.display(), e);
                T::default()
            }
        }
    }

    /// Write a value through a temp file and rename, off the async runtime
    pub async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path(key);
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| VoiceError::Io(format!("failed to serialize {}: {}", key, e)))?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            // Write then rename so a crash never leaves a half-written file.
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, json)?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| VoiceError::Io(format!("store writer failed: {}", e)))??;

        debug!("Persisted {}", key);
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key);
        tokio::task::spawn_blocking(move || -> Result<()> {
            match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(|e| VoiceError::Io(format!("store writer failed: {}", e)))?
    }
}

/// Application state shared by the HTTP layer and the voice session sync task
#[derive(Debug, Default)]
pub struct AppStore {
    storage: Option<JsonStorage>,
    profile: Option<UserProfile>,
    memories: Vec<MemoryEntry>,
    companion_messages: Vec<ConversationMessage>,
    companion_tags: Vec<CompanionTag>,
}

impl AppStore {
    /// Store that keeps everything in memory
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store from disk
    pub fn open(storage: JsonStorage) -> Self {
        let profile: Option<UserProfile> = storage.read(PROFILE_KEY);
        let memories: Vec<MemoryEntry> = storage.read(MEMORIES_KEY);
        let companion_messages: Vec<ConversationMessage> = storage.read(COMPANION_MESSAGES_KEY);
        let companion_tags: Vec<CompanionTag> = storage.read(COMPANION_TAGS_KEY);

        info!(
            "Store loaded from {}: profile={}, {} memories, {} companion messages",
            storage.dir().display(),
            profile.is_some(),
            memories.len(),
            companion_messages.len()
        );

        Self {
            storage: Some(storage),
            profile,
            memories,
            companion_messages,
            companion_tags,
        }
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    pub fn memories(&self) -> &[MemoryEntry] {
        &self.memories
    }

    pub fn memory(&self, id: &str) -> Option<&MemoryEntry> {
        self.memories.iter().find(|m| m.id == id)
    }

    pub fn companion_messages(&self) -> &[ConversationMessage] {
        &self.companion_messages
    }

    pub fn companion_tags(&self) -> &[CompanionTag] {
        &self.companion_tags
    }

    // Mutations persist the new value first and only then replace the
    // in-memory copy, so a failed write leaves the store unchanged.

    pub async fn set_profile(&mut self, mut profile: UserProfile) -> Result<UserProfile> {
        if profile.id.is_empty() {
            profile.id = format!("user-{}", uuid::Uuid::new_v4());
        }
        self.persist(PROFILE_KEY, &profile).await?;
        info!("Profile saved for {}", profile.display_name());
        self.profile = Some(profile.clone());
        Ok(profile)
    }

    pub async fn clear_profile(&mut self) -> Result<()> {
        if let Some(storage) = &self.storage {
            storage.remove(PROFILE_KEY).await?;
        }
        self.profile = None;
        Ok(())
    }

    pub async fn add_memory(&mut self, memory: NewMemory) -> Result<MemoryEntry> {
        let entry = MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            kind: memory.kind,
            title: memory.title,
            description: memory.description,
            tags: memory.tags,
            created_at: Utc::now(),
        };
        let mut memories = self.memories.clone();
        memories.push(entry.clone());
        self.commit_memories(memories).await?;
        Ok(entry)
    }

    /// Returns `None` when no memory has this id
    pub async fn update_memory(
        &mut self,
        id: &str,
        update: MemoryUpdate,
    ) -> Result<Option<MemoryEntry>> {
        let mut memories = self.memories.clone();
        let Some(entry) = memories.iter_mut().find(|m| m.id == id) else {
            return Ok(None);
        };

        if let Some(kind) = update.kind {
            entry.kind = kind;
        }
        if let Some(title) = update.title {
            entry.title = title;
        }
        if let Some(description) = update.description {
            entry.description = Some(description);
        }
        if let Some(tags) = update.tags {
            entry.tags = tags;
        }
        let updated = entry.clone();

        self.commit_memories(memories).await?;
        Ok(Some(updated))
    }

    /// Returns whether a memory was removed
    pub async fn delete_memory(&mut self, id: &str) -> Result<bool> {
        let memories: Vec<MemoryEntry> = self
            .memories
            .iter()
            .filter(|m| m.id != id)
            .cloned()
            .collect();
        if memories.len() == self.memories.len() {
            return Ok(false);
        }
        self.commit_memories(memories).await?;
        Ok(true)
    }

    pub async fn add_companion_message(&mut self, message: ConversationMessage) -> Result<()> {
        let mut messages = self.companion_messages.clone();
        messages.push(message);
        self.persist(COMPANION_MESSAGES_KEY, &messages).await?;
        self.companion_messages = messages;
        Ok(())
    }

    /// Merge tags, keeping the first occurrence of each label; returns how many were new
    pub async fn add_companion_tags(&mut self, tags: &[CompanionTag]) -> Result<usize> {
        let mut merged = self.companion_tags.clone();
        let mut added = 0;
        for tag in tags {
            if merged.iter().any(|t| t.label == tag.label) {
                continue;
            }
            merged.push(tag.clone());
            added += 1;
        }

        if added > 0 {
            self.persist(COMPANION_TAGS_KEY, &merged).await?;
            self.companion_tags = merged;
        }
        Ok(added)
    }

    async fn commit_memories(&mut self, memories: Vec<MemoryEntry>) -> Result<()> {
        self.persist(MEMORIES_KEY, &memories).await?;
        self.memories = memories;
        Ok(())
    }

    async fn persist<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        match &self.storage {
            Some(storage) => storage.write(key, value).await,
            None => Ok(()),
        }
    }
}
