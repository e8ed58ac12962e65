use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub fn write_atomic<F>(path: &Path, write_fn: F) -> Result<(), String>
where
    F: FnOnce(&mut NamedTempFile) -> Result<(), String>,
{
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(parent)
        .map_err(|err| format!("Failed to create temp file in {parent:?}: {err}"))?;
    write_fn(&mut temp)?;
    temp.flush()
        .map_err(|err| format!("Failed to flush {}: {err}", path.display()))?;
    temp.persist(path)
        .map_err(|err| format!("Failed to persist {}: {err}", path.display()))?;
    Ok(())
}

pub fn ensure_parent_dir(path: &Path) -> Result<Option<PathBuf>, String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|err| format!("Failed to create directory {parent:?}: {err}"))?;
            return Ok(Some(parent.to_path_buf()));
        }
    }
    Ok(None)
}
