//! Lock files, export registry and template paths: load, save (atomic).

use super::types::{ExportRegistry, StackLock};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// Derive the lock file path for a stack within the state directory.
pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("state.lock.yaml")
}

/// Path of the export registry.
pub fn exports_path(state_dir: &Path) -> PathBuf {
    state_dir.join("exports.yaml")
}

/// Path of a synthesized stack template.
pub fn template_path(out_dir: &Path, stack: &str) -> PathBuf {
    out_dir.join(format!("{}.template.json", stack))
}

fn load_yaml<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Option<T>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let value = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid {} {}: {}", what, path.display(), e))?;
    Ok(Some(value))
}

/// Write atomically: temp file + rename.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, content)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("cannot rename {} → {}: {}", tmp_path.display(), path.display(), e))
}

fn save_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let yaml = serde_yaml_ng::to_string(value).map_err(|e| format!("serialize error: {}", e))?;
    write_atomic(path, &yaml)
}

/// Load a stack's lock file. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, stack: &str) -> Result<Option<StackLock>, String> {
    load_yaml(&lock_file_path(state_dir, stack), "lock file")
}

/// Save a lock file atomically.
pub fn save_lock(state_dir: &Path, lock: &StackLock) -> Result<(), String> {
    save_yaml(&lock_file_path(state_dir, &lock.stack), lock)
}

/// Remove a stack's lock file (stack left the graph).
pub fn remove_lock(state_dir: &Path, stack: &str) -> Result<(), String> {
    let path = lock_file_path(state_dir, stack);
    if path.exists() {
        std::fs::remove_file(&path)
            .map_err(|e| format!("cannot remove {}: {}", path.display(), e))?;
    }
    Ok(())
}

/// Stack ids that have a lock file in the state directory (sorted).
pub fn locked_stacks(state_dir: &Path) -> Result<Vec<String>, String> {
    if !state_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read {}: {}", state_dir.display(), e))?;
    let mut stacks: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().join("state.lock.yaml").is_file())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    stacks.sort();
    Ok(stacks)
}

/// Load the export registry (empty if absent).
pub fn load_exports(state_dir: &Path) -> Result<ExportRegistry, String> {
    Ok(load_yaml(&exports_path(state_dir), "export registry")?.unwrap_or_default())
}

/// Save the export registry atomically.
pub fn save_exports(state_dir: &Path, registry: &ExportRegistry) -> Result<(), String> {
    save_yaml(&exports_path(state_dir), registry)
}

/// Create a new empty lock for a stack.
pub fn new_lock(stack: &str) -> StackLock {
    use crate::tripwire::eventlog::now_iso8601;
    StackLock {
        schema: "1.0".to_string(),
        stack: stack.to_string(),
        generated_at: now_iso8601(),
        generator: format!("stackwright {}", env!("CARGO_PKG_VERSION")),
        blake3_version: "1.8".to_string(),
        template_path: None,
        template_hash: None,
        resources: indexmap::IndexMap::new(),
        outputs: indexmap::IndexMap::new(),
    }
}
