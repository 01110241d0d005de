use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;

use crate::Error;
use crate::Result;

/// Opens a file for appending, creating missing parent directories first.
pub fn open_file_for_append(path: impl AsRef<Path>) -> Result<File> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Fatal(format!("create {}: {}", parent.display(), e)))?;
    }
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| Error::Fatal(format!("open {}: {}", path.display(), e)))
}
