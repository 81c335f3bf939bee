//! On-disk layout of the embedded store.
//!
//! Current layout: `{data_dir}/sqlite/v1/{file}`. Older installs kept the
//! file directly in the data root; [`migrate_layout`] moves it (and its
//! `-wal` / `-shm` side files) into place.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::DbError;

/// Directory of the embedded store, relative to the data root.
pub const LAYOUT_DIR: [&str; 2] = ["sqlite", "v1"];

/// Suffix given to a legacy store once it has been migrated.
pub const MIGRATED_SUFFIX: &str = ".old";

const SIDE_FILE_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// Directory holding the embedded store.
pub fn layout_dir(data_dir: &Path) -> PathBuf {
    LAYOUT_DIR.iter().fold(data_dir.to_path_buf(), |dir, part| dir.join(part))
}

/// Full path of the embedded store file.
pub fn database_path(data_dir: &Path, file: &str) -> PathBuf {
    layout_dir(data_dir).join(file)
}

/// Locate the embedded store named `file` so a server backend can import
/// it.
///
/// Looks in the versioned directory first, then the data root.
pub fn find_legacy_store(data_dir: &Path, file: &str) -> Option<PathBuf> {
    [database_path(data_dir, file), data_dir.join(file)]
        .into_iter()
        .find(|path| path.is_file())
}

/// `graves.db` → `graves.db.old`.
pub fn migrated_path(legacy: &Path) -> PathBuf {
    with_suffix(legacy, MIGRATED_SUFFIX)
}

/// Rename a migrated legacy store (and its side files) to `*.old`.
///
/// # Errors
///
/// Returns [`DbError::Io`] if the main file cannot be renamed.
pub fn archive_legacy_store(legacy: &Path) -> Result<PathBuf, DbError> {
    let archived = migrated_path(legacy);
    std::fs::rename(legacy, &archived)?;
    for suffix in SIDE_FILE_SUFFIXES {
        let side = with_suffix(legacy, suffix);
        if side.is_file() {
            if let Err(e) = std::fs::rename(&side, with_suffix(&archived, suffix)) {
                warn!(file = %side.display(), error = %e, "Could not archive side file");
            }
        }
    }
    info!(archived = %archived.display(), "Archived legacy store");
    Ok(archived)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Move a store left in the data root into the versioned directory.
///
/// Always creates the versioned directory. Returns `true` when files were
/// moved. A store already present at the destination is never overwritten.
///
/// # Errors
///
/// Returns [`DbError::Io`] if the directory cannot be created or a file
/// cannot be moved.
pub fn migrate_layout(data_dir: &Path, file: &str) -> Result<bool, DbError> {
    let target_dir = layout_dir(data_dir);
    std::fs::create_dir_all(&target_dir)?;

    let source = data_dir.join(file);
    let target = target_dir.join(file);
    if !source.is_file() {
        return Ok(false);
    }
    if target.exists() {
        warn!(
            source = %source.display(),
            target = %target.display(),
            "Store exists in both locations; leaving the old one in place"
        );
        return Ok(false);
    }

    std::fs::rename(&source, &target)?;
    for suffix in SIDE_FILE_SUFFIXES {
        let side = with_suffix(&source, suffix);
        if side.is_file() {
            std::fs::rename(&side, with_suffix(&target, suffix))?;
        }
    }
    info!(
        source = %source.display(),
        target = %target.display(),
        "Moved embedded store into versioned layout"
    );
    Ok(true)
}
