use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::Result;

/// Durably replaces the file at `path` with `payload`.
///
/// The payload is staged to a uniquely named sibling file, flushed to disk,
/// and renamed onto the canonical path. Rename is atomic with respect to
/// concurrent opens, so a reader observes either the complete old content or
/// the complete new content, never a mixture. The caller is expected to hold
/// the document's exclusive lock for the duration.
///
/// A failed rename may leave the staging file behind; its name is unique per
/// writer and ignored by readers, so orphans are harmless.
pub fn replace_file(path: &Path, payload: &[u8]) -> Result<()> {
    let temp_path = staging_path(path);

    let mut temp = File::create(&temp_path)?;
    temp.write_all(payload)?;
    if let Err(e) = temp.sync_all() {
        // Some filesystems (notably certain network mounts) refuse fsync.
        if e.kind() == ErrorKind::Unsupported {
            debug!("fsync not supported for {:?}, continuing: {}", temp_path, e);
        } else {
            return Err(e.into());
        }
    }
    drop(temp);

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Staging name `<file>.tmp.<pid>.<epoch-ms>`: unique per writer, so racing
/// writers cannot collide on the staging file even if locking is degraded.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        "{}.tmp.{}.{}",
        name,
        std::process::id(),
        epoch_millis()
    ))
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
