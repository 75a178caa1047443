//! Scoped mutation of a persisted store.
//!
//! A [`Session`] owns the store and the file it lives in. Every change goes
//! through [`Session::update`], which works on a copy and only commits and
//! persists it when the closure succeeds.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use cosmos_core::error::TxDbError;

use crate::local::LocalTxDb;

pub struct Session {
    store: LocalTxDb,
    path: Option<PathBuf>,
}

impl Session {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TxDbError> {
        let path = path.as_ref().to_path_buf();
        let store = if path.exists() {
            LocalTxDb::load(&path)?
        } else {
            info!(path = %path.display(), "txdb: creating new store");
            LocalTxDb::new()
        };
        Ok(Self { store, path: Some(path) })
    }

    /// A session that never touches disk.
    pub fn in_memory(store: LocalTxDb) -> Self {
        Self { store, path: None }
    }

    pub fn store(&self) -> &LocalTxDb {
        &self.store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against a working copy of the store.
    ///
    /// On `Ok` the copy is persisted and becomes the store. On `Err`, or if
    /// persisting fails, the copy is discarded and the store is unchanged.
    pub fn update<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut LocalTxDb) -> Result<T, E>,
        E: From<TxDbError>,
    {
        let mut working = self.store.clone();
        let out = f(&mut working)?;
        if working != self.store {
            if let Some(path) = &self.path {
                working.save(path)?;
            }
            self.store = working;
        } else {
            debug!("txdb: update made no changes");
        }
        Ok(out)
    }

    pub fn into_inner(self) -> LocalTxDb {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{address, tx};
    use bitcoin::OutPoint;
    use cosmos_core::traits::WritableTxDb;

    #[test]
    fn commit_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("txdb.json");
        let mut session = Session::open(&path).unwrap();

        let t = tx(1, &[1]);
        session
            .update(|db| -> Result<(), TxDbError> {
                db.insert_pending(&t);
                Ok(())
            })
            .unwrap();

        assert_eq!(session.store().pending().len(), 1);
        let reopened = Session::open(&path).unwrap();
        assert_eq!(reopened.store(), session.store());
    }

    #[test]
    fn discard_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("txdb.json");
        let mut session = Session::open(&path).unwrap();

        let t = tx(1, &[1]);
        let result = session.update(|db| -> Result<(), TxDbError> {
            db.insert_pending(&t);
            db.add_address(&address(1), OutPoint::new(t.compute_txid(), 0));
            Err(TxDbError::Storage("boom".into()))
        });

        assert!(result.is_err());
        assert!(session.store().pending().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn in_memory_session() {
        let mut session = Session::in_memory(LocalTxDb::new());
        let n = session
            .update(|db| -> Result<usize, TxDbError> {
                db.insert_pending(&tx(2, &[1]));
                Ok(db.transaction_count())
            })
            .unwrap();
        assert_eq!(n, 1);
        assert!(session.path().is_none());
        assert_eq!(session.into_inner().transaction_count(), 1);
    }
}
