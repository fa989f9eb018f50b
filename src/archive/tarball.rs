//! tar.gz archives of backup targets.

use super::ArchiveReport;
use crate::{Error, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Archive `dir` into `<temp dir>/<dir name>-<random>.tar.gz`.
///
/// Entries are stored as `<dir name>/<relative path>`. Files that cannot be
/// opened are skipped and reported in `failed_files`; a failure while writing
/// the archive itself aborts the whole archive.
///
/// `cancelled` is checked before every entry. Once set, the partial archive
/// is removed and an `Archive` error is returned.
pub fn archive_directory(dir: &Path, cancelled: &AtomicBool) -> Result<ArchiveReport> {
    let metadata = fs::metadata(dir)?;
    if !metadata.is_dir() {
        return Err(Error::Archive {
            reason: format!("not a directory: {}", dir.display()),
        });
    }

    let dir_name = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());

    let temp = tempfile::Builder::new()
        .prefix(&format!("{dir_name}-"))
        .suffix(".tar.gz")
        .tempfile()?;
    let (file, archive_path) = temp.into_parts();

    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut total_files = 0;
    let mut total_dirs = 0;
    let mut success_files = 0;
    let mut failed_files: BTreeMap<PathBuf, String> = BTreeMap::new();

    for entry in WalkDir::new(dir).follow_links(false) {
        if cancelled.load(Ordering::Relaxed) {
            debug!("Archiving {} cancelled", dir.display());
            return Err(Error::Archive {
                reason: "cancelled".to_string(),
            });
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| dir.to_path_buf());
                warn!("Skipping entry {}: {}", path.display(), e);
                failed_files.insert(path, e.to_string());
                continue;
            }
        };

        let path = entry.path();
        // The archive may be written inside the directory being archived
        if path == &*archive_path {
            continue;
        }

        let relative = path.strip_prefix(dir).unwrap_or(path);
        let name = Path::new(&dir_name).join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            total_dirs += 1;
            builder
                .append_dir(&name, path)
                .map_err(|e| archive_error(path, e))?;
            continue;
        }

        total_files += 1;
        if file_type.is_symlink() {
            builder
                .append_path_with_name(path, &name)
                .map_err(|e| archive_error(path, e))?;
            success_files += 1;
            continue;
        }

        let mut source = match File::open(path) {
            Ok(source) => source,
            Err(e) => {
                warn!("Failed to open {}: {}", path.display(), e);
                failed_files.insert(path.to_path_buf(), e.to_string());
                continue;
            }
        };
        builder
            .append_file(&name, &mut source)
            .map_err(|e| archive_error(path, e))?;
        success_files += 1;
    }

    let encoder = builder.into_inner().map_err(|e| archive_error(dir, e))?;
    let writer = encoder.finish().map_err(|e| archive_error(dir, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| archive_error(dir, e.into_error()))?;
    file.sync_all()?;

    debug!(
        "Archived {} into {} ({}/{} files, {} dirs)",
        dir.display(),
        archive_path.display(),
        success_files,
        total_files,
        total_dirs
    );

    Ok(ArchiveReport {
        archive: archive_path,
        total_files,
        total_dirs,
        success_files,
        failed_files,
    })
}

fn archive_error(path: &Path, e: std::io::Error) -> Error {
    Error::Archive {
        reason: format!("{}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn entry_names(archive: &Path) -> Vec<String> {
        let file = File::open(archive).unwrap();
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        let mut names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
            .map(|name| name.trim_end_matches('/').to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_archive_directory_contents() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("documents");
        fs::create_dir_all(source.join("letters")).unwrap();
        fs::write(source.join("todo.txt"), b"write tests").unwrap();
        fs::write(source.join("letters/hello.txt"), b"hello").unwrap();

        let report = archive_directory(&source, &AtomicBool::new(false)).unwrap();

        assert_eq!(report.total_files, 2);
        assert_eq!(report.success_files, 2);
        assert_eq!(report.total_dirs, 2);
        assert!(report.failed_files.is_empty());
        assert!(report
            .archive
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with(".tar.gz"));
        assert_eq!(
            entry_names(&report.archive),
            vec![
                "documents",
                "documents/letters",
                "documents/letters/hello.txt",
                "documents/todo.txt",
            ]
        );
    }

    #[test]
    fn test_empty_directory_has_no_files() {
        let temp_dir = TempDir::new().unwrap();
        let report = archive_directory(temp_dir.path(), &AtomicBool::new(false)).unwrap();
        assert_eq!(report.total_files, 0);
        assert_eq!(report.success_files, 0);
        assert_eq!(report.total_dirs, 1);
    }

    #[test]
    fn test_archive_removed_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"a").unwrap();

        let report = archive_directory(temp_dir.path(), &AtomicBool::new(false)).unwrap();
        let path = report.archive.to_path_buf();
        assert!(path.is_file());

        drop(report);
        assert!(!path.exists());
    }

    #[test]
    fn test_cancelled_archive_is_removed() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("cancelled-source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), b"a").unwrap();

        let err = archive_directory(&source, &AtomicBool::new(true)).unwrap_err();

        assert!(matches!(err, Error::Archive { ref reason } if reason == "cancelled"));
        let leftovers: Vec<_> = fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("cancelled-source-")
            })
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_rejects_non_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();

        assert!(matches!(
            archive_directory(&file, &AtomicBool::new(false)),
            Err(Error::Archive { .. })
        ));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        assert!(matches!(
            archive_directory(&missing, &AtomicBool::new(false)),
            Err(Error::Io(_))
        ));
    }
}
