use crate::error::StoreError;
use crate::models::StoreSnapshot;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reads a persisted snapshot. Missing or unreadable stores are a cache miss, never an error.
pub fn load_snapshot(path: &Path) -> Option<StoreSnapshot> {
    if !path.exists() {
        debug!(path = %path.display(), "no persisted store");
        return None;
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to read store");
            return None;
        }
    };

    match serde_json::from_str::<StoreSnapshot>(&raw) {
        Ok(snapshot) => Some(snapshot),
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to parse store, treating as absent");
            None
        }
    }
}

/// Writes to a sibling temp file and renames it over `path`, so readers only ever see a
/// complete store.
pub fn save_snapshot_atomic(path: &Path, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let payload = serde_json::to_vec(snapshot)?;
    let tmp_path = temp_sibling(path);
    fs::write(&tmp_path, payload)?;
    if let Err(error) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error.into());
    }

    debug!(path = %path.display(), chunks = snapshot.chunks.len(), "store persisted");
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, IndexedChunk};
    use tempfile::tempdir;

    fn snapshot() -> StoreSnapshot {
        let entries = (0..3u64)
            .map(|index| IndexedChunk {
                chunk: Chunk {
                    id: Chunk::sequence_id(index),
                    text: format!("chunk number {index}"),
                    page: index as u32 + 1,
                    start_char: index as usize * 20,
                    end_char: index as usize * 20 + 14,
                },
                embedding: vec![index as f32, 0.5, -0.25],
            })
            .collect::<Vec<_>>();
        StoreSnapshot::from_entries("abc123", Some("char-trigram".to_string()), &entries)
    }

    #[test]
    fn saved_snapshot_loads_back() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("embed_store.json");
        let saved = snapshot();

        save_snapshot_atomic(&path, &saved)?;
        let loaded = load_snapshot(&path).ok_or("store should load")?;

        assert_eq!(loaded.chunks, saved.chunks);
        assert_eq!(loaded.embeddings, saved.embeddings);
        assert_eq!(loaded.source_hash, "abc123");
        assert!(!temp_sibling(&path).exists());
        Ok(())
    }

    #[test]
    fn store_uses_camel_case_parallel_arrays() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("embed_store.json");
        save_snapshot_atomic(&path, &snapshot())?;

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(value["sourceHash"], "abc123");
        assert!(value["createdAt"].is_string());
        assert_eq!(value["chunks"][1]["startChar"], 20);
        assert_eq!(value["embeddings"].as_array().map(Vec::len), Some(3));
        Ok(())
    }

    #[test]
    fn overwrite_replaces_previous_store() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("embed_store.json");
        save_snapshot_atomic(&path, &snapshot())?;

        let replacement = StoreSnapshot::from_entries("def456", None, &[]);
        save_snapshot_atomic(&path, &replacement)?;

        let loaded = load_snapshot(&path).ok_or("store should load")?;
        assert_eq!(loaded.source_hash, "def456");
        assert!(loaded.chunks.is_empty());
        Ok(())
    }

    #[test]
    fn missing_store_is_none() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(load_snapshot(&dir.path().join("absent.json")).is_none());
        Ok(())
    }

    #[test]
    fn truncated_store_is_none() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("embed_store.json");
        fs::write(&path, r#"{"sourceHash":"abc","chunks":[{"id":"chunk_0","te"#)?;
        assert!(load_snapshot(&path).is_none());
        Ok(())
    }
}
