//! Label registry: interns human-readable names (namespace, binding, metric
//! and event names) to small integer ids.
//!
//! Ids are allocated append-only and persisted in a sled tree, so a restart
//! over the same directory yields the same id for every previously-seen name.
//! External metric and affinity references stay valid across restarts because
//! of this property.

use std::path::Path;

use parking_lot::Mutex;
use sled::transaction::TransactionError;
use sled::Transactional;
use tracing::debug;

use crate::Result;
use crate::StorageError;

const BY_NAME_TREE: &str = "labels_by_name";
const BY_ID_TREE: &str = "labels_by_id";

/// Process-wide name-to-id table.
///
/// Reads go straight to the sled trees; only the allocation path is
/// serialized, through a single mutex guarding the append.
pub struct LabelRegistry {
    db: sled::Db,
    by_name: sled::Tree,
    by_id: sled::Tree,
    append: Mutex<()>,
}

impl LabelRegistry {
    /// Opens (or creates) the label table under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let db = sled::Config::new().path(dir.as_ref()).open()?;
        let by_name = db.open_tree(BY_NAME_TREE)?;
        let by_id = db.open_tree(BY_ID_TREE)?;
        debug!(
            path = %dir.as_ref().display(),
            labels = by_id.len(),
            "label registry opened"
        );
        Ok(Self {
            db,
            by_name,
            by_id,
            append: Mutex::new(()),
        })
    }

    /// Opens an ephemeral in-memory table. Ids are stable only for the
    /// process lifetime; used when no label directory is configured.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let by_name = db.open_tree(BY_NAME_TREE)?;
        let by_id = db.open_tree(BY_ID_TREE)?;
        Ok(Self {
            db,
            by_name,
            by_id,
            append: Mutex::new(()),
        })
    }

    /// Returns the id for `name`, allocating the next one on first sight.
    ///
    /// Ids start at 1; 0 is the reserved "unset" label. Concurrent calls for
    /// the same name return the same id.
    pub fn supply_label_id(&self, name: &str) -> Result<i32> {
        if let Some(raw) = self.by_name.get(name.as_bytes())? {
            return decode_id(&raw);
        }

        let _guard = self.append.lock();
        // A racing caller may have allocated while we waited for the lock.
        if let Some(raw) = self.by_name.get(name.as_bytes())? {
            return decode_id(&raw);
        }

        let id = (self.by_id.len() as i32) + 1;
        let id_bytes = id.to_be_bytes();
        // Both mappings land atomically; a crash can not leave a name
        // without its reverse entry and skew ids after restart.
        (&self.by_name, &self.by_id)
            .transaction(|(names, ids)| {
                names.insert(name.as_bytes(), &id_bytes[..])?;
                ids.insert(&id_bytes[..], name.as_bytes())?;
                Ok(())
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Abort(()) => {
                    StorageError::Corrupt("label append aborted".into())
                }
                TransactionError::Storage(e) => StorageError::Sled(e),
            })?;
        debug!(label = name, id, "label allocated");
        Ok(id)
    }

    /// Inverse of [`supply_label_id`](Self::supply_label_id).
    pub fn lookup_label(&self, id: i32) -> Option<String> {
        self.by_id
            .get(id.to_be_bytes())
            .ok()
            .flatten()
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
    }

    /// Number of interned labels.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Flushes the table to disk. Called on engine close.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_id(raw: &[u8]) -> Result<i32> {
    let bytes: [u8; 4] = raw
        .try_into()
        .map_err(|_| StorageError::Corrupt(format!("label id width {}", raw.len())))?;
    Ok(i32::from_be_bytes(bytes))
}
