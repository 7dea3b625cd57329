//! A synchronous, single-threaded [`Engine`] over the local filesystem. Atomic create-new
//! writes are implemented with `link(2)`, which fails with `EEXIST` when the target exists.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::{DeltaResult, Engine, Error, FileMeta, JsonHandler, StorageHandler};

/// A shared, reusable engine backed by the local filesystem.
#[derive(Debug, Default)]
pub struct SyncEngine {
    storage_handler: Arc<SyncStorageHandler>,
    json_handler: Arc<SyncJsonHandler>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for SyncEngine {
    fn storage_handler(&self) -> Arc<dyn StorageHandler> {
        self.storage_handler.clone()
    }

    fn json_handler(&self) -> Arc<dyn JsonHandler> {
        self.json_handler.clone()
    }
}

fn to_file_path(url: &Url) -> DeltaResult<PathBuf> {
    url.to_file_path()
        .map_err(|_| Error::invalid_table_location(url))
}

#[derive(Debug, Default)]
pub struct SyncStorageHandler;

impl StorageHandler for SyncStorageHandler {
    fn list_from(
        &self,
        path: &Url,
    ) -> DeltaResult<Box<dyn Iterator<Item = DeltaResult<FileMeta>> + Send>> {
        // a trailing slash on the url lists the whole directory; otherwise the final segment
        // is the (exclusive-parent, inclusive-start) listing key
        let is_directory = path.path().ends_with('/');
        let path = to_file_path(path)?;
        let (dir, start_name) = if is_directory {
            (path, String::new())
        } else {
            match path.file_name() {
                Some(name) => (
                    path.parent()
                        .ok_or_else(|| Error::invalid_table_location(path.display()))?
                        .to_path_buf(),
                    name.to_string_lossy().into_owned(),
                ),
                None => (path.clone(), String::new()),
            }
        };
        let entries = std::fs::read_dir(&dir).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::file_not_found(dir.display()),
            _ => Error::IoError(e),
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.as_str() < start_name.as_str() {
                continue;
            }
            let metadata = entry.metadata()?;
            let last_modified = metadata
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            let location = Url::from_file_path(entry.path())
                .map_err(|_| Error::invalid_table_location(entry.path().display()))?;
            files.push((name, FileMeta::new(location, last_modified, metadata.len())));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Box::new(files.into_iter().map(|(_, meta)| Ok(meta))))
    }

    fn mkdirs(&self, path: &Url) -> DeltaResult<bool> {
        let path = to_file_path(path)?;
        std::fs::create_dir_all(&path)?;
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct SyncJsonHandler;

impl JsonHandler for SyncJsonHandler {
    fn read_json_lines(
        &self,
        file: &FileMeta,
    ) -> DeltaResult<Box<dyn Iterator<Item = DeltaResult<String>> + Send>> {
        let path = to_file_path(&file.location)?;
        let file = File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::file_not_found(path.display()),
            _ => Error::IoError(e),
        })?;
        let lines = BufReader::new(file)
            .lines()
            .map(|line| line.map_err(Error::from))
            .filter(|line| line.as_ref().map(|l| !l.is_empty()).unwrap_or(true));
        Ok(Box::new(lines))
    }

    fn write_json_lines(
        &self,
        path: &Url,
        lines: &mut dyn Iterator<Item = DeltaResult<String>>,
        overwrite: bool,
    ) -> DeltaResult<()> {
        let target = to_file_path(path)?;
        let dir = target
            .parent()
            .ok_or_else(|| Error::invalid_table_location(target.display()))?;

        // Stage the complete file next to the target, then move it into place. For the
        // non-overwrite case a hard link performs the atomic create-new: it fails with
        // `EEXIST` when someone else won the race, and the staged file is discarded.
        let staged = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let result = (|| -> DeltaResult<()> {
            let mut writer = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staged)?;
            for line in lines {
                writer.write_all(line?.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            writer.sync_all()?;
            drop(writer);
            if overwrite {
                std::fs::rename(&staged, &target)?;
            } else {
                std::fs::hard_link(&staged, &target).map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => Error::file_already_exists(target.display()),
                    _ => Error::IoError(e),
                })?;
                std::fs::remove_file(&staged)?;
            }
            Ok(())
        })();
        if result.is_err() {
            // best effort cleanup of the staged file
            let _ = std::fs::remove_file(&staged);
        } else {
            debug!(path = %path, "wrote json file");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn url_for(dir: &std::path::Path, name: &str) -> Url {
        Url::from_file_path(dir.join(name)).unwrap()
    }

    #[test]
    fn test_write_and_read_json_lines() {
        let dir = tempdir().unwrap();
        let handler = SyncJsonHandler;
        let target = url_for(dir.path(), "data.json");
        let mut lines = vec![Ok("{\"a\":1}".to_string()), Ok("{\"a\":2}".to_string())].into_iter();
        handler.write_json_lines(&target, &mut lines, false).unwrap();

        let read: Vec<String> = handler
            .read_json_lines(&FileMeta::new(target, 0, 0))
            .unwrap()
            .collect::<DeltaResult<_>>()
            .unwrap();
        assert_eq!(read, vec!["{\"a\":1}", "{\"a\":2}"]);
    }

    #[test]
    fn test_create_new_signals_collision() {
        let dir = tempdir().unwrap();
        let handler = SyncJsonHandler;
        let target = url_for(dir.path(), "00000000000000000000.json");
        let mut first = std::iter::once(Ok("{}".to_string()));
        handler.write_json_lines(&target, &mut first, false).unwrap();

        let mut second = std::iter::once(Ok("{}".to_string()));
        let err = handler
            .write_json_lines(&target, &mut second, false)
            .unwrap_err();
        assert!(matches!(err, Error::FileAlreadyExists(_)));

        // no stray staging files remain
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let dir = tempdir().unwrap();
        let handler = SyncJsonHandler;
        let target = url_for(dir.path(), "partial.json");
        let mut lines = vec![
            Ok("{\"a\":1}".to_string()),
            Err(Error::generic("boom")),
        ]
        .into_iter();
        assert!(handler.write_json_lines(&target, &mut lines, false).is_err());
        assert!(!dir.path().join("partial.json").exists());
    }

    #[test]
    fn test_list_from_is_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        for name in ["00.json", "01.json", "02.json"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        std::fs::create_dir(dir.path().join("03.json")).unwrap(); // a directory, not a file

        let handler = SyncStorageHandler;
        let listed: Vec<FileMeta> = handler
            .list_from(&url_for(dir.path(), "01.json"))
            .unwrap()
            .collect::<DeltaResult<_>>()
            .unwrap();
        let names: Vec<_> = listed
            .iter()
            .map(|f| f.location.path_segments().unwrap().next_back().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["01.json", "02.json"]);
    }

    #[test]
    fn test_list_from_missing_dir() {
        let handler = SyncStorageHandler;
        let url = Url::from_file_path("/definitely/not/a/real/dir/x.json").unwrap();
        assert!(matches!(
            handler.list_from(&url),
            Err(Error::FileNotFound(_))
        ));
    }

    #[test]
    fn test_mkdirs() {
        let dir = tempdir().unwrap();
        let handler = SyncStorageHandler;
        let nested = Url::from_file_path(dir.path().join("a/b/c")).unwrap();
        assert!(handler.mkdirs(&nested).unwrap());
        assert!(dir.path().join("a/b/c").is_dir());
    }
}
