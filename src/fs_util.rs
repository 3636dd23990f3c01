use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::StudyError;

/// Unpacks a downloaded artifact archive next to it. Entries that would
/// escape `target_dir` are rejected.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<usize, StudyError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| StudyError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| StudyError::Filesystem(err.to_string()))?;

    let mut written = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| StudyError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(StudyError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| StudyError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| StudyError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| StudyError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| StudyError::Filesystem(err.to_string()))?;
        written += 1;
    }
    tracing::debug!(files = written, target = %target_dir.display(), "archive extracted");
    Ok(written)
}
