use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{read, write};

/// Descriptive snapshot of a sandbox, safe to copy and hand out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxInfo {
    /// Runtime-assigned container id.
    pub id: String,
    /// Language the sandbox was provisioned for.
    pub language: String,
    /// Image the sandbox was created from.
    pub image: String,
    /// When the sandbox finished starting.
    pub created_at: DateTime<Utc>,
}

/// Exclusive handle to a started sandbox.
///
/// Not `Clone`: whoever holds the value (an idle queue or one caller) is the
/// only holder, so the same sandbox can never be handed to two callers.
#[derive(Debug)]
pub struct Sandbox {
    info: SandboxInfo,
}

impl Sandbox {
    pub(crate) fn new(id: String, language: String, image: String) -> Self {
        Self {
            info: SandboxInfo {
                id,
                language,
                image,
                created_at: Utc::now(),
            },
        }
    }

    /// Runtime container id.
    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// Language this sandbox serves.
    pub fn language(&self) -> &str {
        &self.info.language
    }

    /// Snapshot of the sandbox's metadata.
    pub fn info(&self) -> &SandboxInfo {
        &self.info
    }

    pub(crate) fn into_info(self) -> SandboxInfo {
        self.info
    }
}

/// Every sandbox that started successfully and has not been retired yet,
/// independent of whether it is idle or in use.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: RwLock<HashMap<String, SandboxInfo>>,
}

impl Registry {
    /// Inserts `info` unless `admit` returns false. `admit` runs inside the
    /// write section so a concurrent [`Registry::snapshot`] either sees the
    /// entry or the refusal.
    pub fn insert_if(&self, info: SandboxInfo, admit: impl FnOnce() -> bool) -> bool {
        let mut entries = write(&self.entries);
        if !admit() {
            return false;
        }
        entries.insert(info.id.clone(), info);
        true
    }

    pub fn remove(&self, id: &str) -> Option<SandboxInfo> {
        write(&self.entries).remove(id)
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        read(&self.entries).contains_key(id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn clear(&self) {
        write(&self.entries).clear();
    }

    /// Copies of all entries, ordered by language then start time.
    pub fn snapshot(&self) -> Vec<SandboxInfo> {
        let mut entries: Vec<SandboxInfo> = read(&self.entries).values().cloned().collect();
        entries.sort_by(|a, b| {
            a.language
                .cmp(&b.language)
                .then(a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        entries
    }
}
