//! Crash-safe file replacement.

use std::io::Write;
use std::path::Path;

use tempfile::Builder;

use crate::error::AuthError;

/// Replace `path` with `contents` via write-temp-then-persist.
///
/// The temp file lives in the same directory so the rename stays on one
/// filesystem; readers observe either the old file or the new one, never a
/// partial write. A temp file that is never persisted is removed on drop.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AuthError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let prefix = path
        .file_name()
        .map(|n| format!(".{}.", n.to_string_lossy()))
        .unwrap_or_else(|| ".portcullis.".to_string());
    let mut temp_file = Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(parent)?;
    temp_file.write_all(contents)?;
    temp_file.as_file_mut().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp_file
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    temp_file
        .persist(path)
        .map_err(|error| AuthError::from(error.error))?;
    Ok(())
}
