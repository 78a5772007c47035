//! Shared filesystem helpers for keyrot crates

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Owner read/write
pub const MODE_OWNER_RW: u32 = 0o600;

/// Owner read only
pub const MODE_OWNER_RO: u32 = 0o400;

/// Owner-only directory
pub const MODE_OWNER_DIR: u32 = 0o700;

/// Write `contents` to `path` atomically
///
/// The data is written to a temporary file in the same directory, synced,
/// given `mode` (when set), and renamed over `path`. Readers observe either
/// the old file or the complete new one. The temporary file is removed on
/// every error path.
pub fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::configuration(format!("No parent directory: {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".keyrot-tmp-")
        .tempfile_in(parent)
        .map_err(|e| Error::io_at(parent, e))?;

    if let Some(mode) = mode {
        set_mode(temp.path(), mode)?;
    }

    temp.write_all(contents)
        .map_err(|e| Error::io_at(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::io_at(temp.path(), e))?;

    temp.persist(path)
        .map_err(|e| Error::io_at(path, e.error))?;
    sync_dir(parent);
    Ok(())
}

/// Set unix permission bits on `path` (no-op elsewhere)
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| Error::io_at(path, e))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

/// Read unix permission bits of `path`
pub fn mode_of(path: &Path) -> Result<Option<u32>> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(path).map_err(|e| Error::io_at(path, e))?;
        return Ok(Some(metadata.permissions().mode() & 0o777));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(None)
    }
}

/// Create `dir` (and parents) and restrict it to the owner
pub fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::io_at(dir, e))?;
    set_mode(dir, MODE_OWNER_DIR)
}

/// Best-effort fsync of a directory so renames inside it are durable
pub fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}
