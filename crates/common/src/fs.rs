//! Atomic JSON persistence for file-backed stores
//!
//! All writes go to a temp file in the target directory and are renamed over
//! the target, so a crash mid-write never leaves a truncated store behind.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Load a JSON document, creating it from `T::default()` when missing.
pub async fn load_or_init<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    if tokio::fs::try_exists(path).await? {
        let contents = tokio::fs::read_to_string(path).await?;
        let value = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), "loaded store file");
        Ok(value)
    } else {
        info!(path = %path.display(), "store file not found, creating empty store");
        let value = T::default();
        write_atomic(path, &value).await?;
        Ok(value)
    }
}

/// Serialize `data` as pretty JSON and atomically replace `path`.
///
/// The file is created with 0600 permissions on unix since stores hold API
/// keys and personal form data.
pub async fn write_atomic<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(data)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Path(format!("{} has no file name", path.display())))?;
    let dir = path
        .parent()
        .ok_or_else(|| Error::Path(format!("{} has no parent directory", path.display())))?;
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, &json).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms).await?;
    }

    tokio::fs::rename(&tmp_path, path).await?;
    debug!(path = %path.display(), bytes = json.len(), "persisted store file");
    Ok(())
}
