//! Durable key/value surfaces over the local filesystem
//!
//! All writes are atomic: serialize to a temp file in the target's
//! directory, fsync, rename over the target, fsync the directory. A
//! reader therefore sees either the pre-write or the post-write version,
//! never a partial file.
//!
//! Layout under the data directory:
//!
//! ```text
//! data/agent_metadata.json
//! data/agents/<agent_id>_state.json
//! data/knowledge_graph.json
//! data/dialectic_sessions/<session_id>.json
//! data/locks/<name>.lock
//! data/backups/<agent_id>_<timestamp>.json
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::StorageError;

pub mod locks;

/// Replace path-hostile characters in an externally chosen identifier so
/// it can appear in a filename.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Filesystem store rooted at the data directory
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    /// Open (and create, if needed) the data directory tree.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        for sub in ["agents", "dialectic_sessions", "locks", "backups"] {
            let dir = data_dir.join(sub);
            fs::create_dir_all(&dir).map_err(|e| StorageError::Io {
                path: dir.display().to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("agent_metadata.json")
    }

    pub fn agent_state_path(&self, agent_id: &str) -> PathBuf {
        self.data_dir
            .join("agents")
            .join(format!("{}_state.json", sanitize_component(agent_id)))
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.data_dir.join("knowledge_graph.json")
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.data_dir
            .join("dialectic_sessions")
            .join(format!("{}.json", sanitize_component(session_id)))
    }

    pub fn backup_path(&self, agent_id: &str, stamp: &str) -> PathBuf {
        self.data_dir
            .join("backups")
            .join(format!("{}_{stamp}.json", sanitize_component(agent_id)))
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    /// Atomically serialize `value` as pretty JSON to `path`.
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        let parent = path.parent().unwrap_or(&self.data_dir);
        let json = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Io {
            path: path.display().to_string(),
            message: format!("serialization failed: {e}"),
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| StorageError::Io {
            path: parent.display().to_string(),
            message: e.to_string(),
        })?;
        tmp.write_all(&json).map_err(|e| StorageError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        tmp.as_file().sync_all().map_err(|e| StorageError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        tmp.persist(path).map_err(|e| StorageError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        // Durability of the rename itself.
        #[cfg(unix)]
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }

        Ok(())
    }

    /// Read and deserialize `path`; `Ok(None)` when the file is absent.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StorageError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    /// Delete a file if present.
    pub fn remove(&self, path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Session ids present on disk, derived from filenames.
    pub fn list_session_ids(&self) -> Result<Vec<String>, StorageError> {
        let dir = self.data_dir.join("dialectic_sessions");
        let mut ids = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| StorageError::Io {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Probe {
        name: String,
        value: u64,
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let path = store.agent_state_path("alpha");
        let probe = Probe {
            name: "alpha".to_string(),
            value: 42,
        };
        store.write_json(&path, &probe).unwrap();
        let back: Probe = store.read_json(&path).unwrap().unwrap();
        assert_eq!(back, probe);
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let out: Option<Probe> = store.read_json(&store.metadata_path()).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn rewrites_leave_no_temp_debris() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let path = store.knowledge_path();
        for value in 0..10u64 {
            store
                .write_json(
                    &path,
                    &Probe {
                        name: "kg".to_string(),
                        value,
                    },
                )
                .unwrap();
        }
        let back: Probe = store.read_json(&path).unwrap().unwrap();
        assert_eq!(back.value, 9);
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().is_file() && e.path() != path)
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn hostile_ids_cannot_escape_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let path = store.agent_state_path("../../etc/passwd");
        assert_eq!(path.parent().unwrap(), dir.path().join("agents"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(!name.contains('/'));
        assert!(!name.contains('\\'));
    }
}
