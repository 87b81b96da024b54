//! Storage abstractions for reading and writing snapshot files
//!
//! All durable bytes go through [`FileIo`], a thin wrapper around an
//! [`ObjectStore`] combined with a [`FileEncryptor`]. The encryptor is an
//! external collaborator; the default implementation passes bytes through
//! unchanged.

use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{Error as ObjectStoreError, ObjectStore};
use tracing::debug;

use crate::errors::FloeResult;

/// Sharable reference to [`ObjectStore`]
pub type ObjectStoreRef = Arc<dyn ObjectStore>;

/// Encryption applied to output files before they reach the object store.
///
/// The real key management lives outside this crate; producers only need the
/// two byte-level hooks.
pub trait FileEncryptor: Send + Sync {
    /// Encrypt the plaintext of a file about to be written.
    fn encrypt(&self, plaintext: Bytes) -> FloeResult<Bytes>;

    /// Decrypt the content of a file read from storage.
    fn decrypt(&self, ciphertext: Bytes) -> FloeResult<Bytes>;
}

/// A [`FileEncryptor`] that stores plaintext.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughEncryptor;

impl FileEncryptor for PassthroughEncryptor {
    fn encrypt(&self, plaintext: Bytes) -> FloeResult<Bytes> {
        Ok(plaintext)
    }

    fn decrypt(&self, ciphertext: Bytes) -> FloeResult<Bytes> {
        Ok(ciphertext)
    }
}

/// File based input and output for table metadata objects.
///
/// Combines an object store with the table's encryption layer so that callers
/// see plaintext on both sides of a round trip.
#[derive(Clone)]
pub struct FileIo {
    store: ObjectStoreRef,
    encryptor: Arc<dyn FileEncryptor>,
}

impl FileIo {
    /// Create a new instance wrapping the given store without encryption.
    pub fn new(store: ObjectStoreRef) -> Self {
        Self {
            store,
            encryptor: Arc::new(PassthroughEncryptor),
        }
    }

    /// Combine this instance with the table's encryption layer.
    pub fn with_encryptor(mut self, encryptor: Arc<dyn FileEncryptor>) -> Self {
        self.encryptor = encryptor;
        self
    }

    /// The underlying object store.
    pub fn object_store(&self) -> ObjectStoreRef {
        self.store.clone()
    }

    /// Write the full content of the file at `location` and return the number
    /// of bytes stored.
    pub async fn put(&self, location: &str, bytes: Bytes) -> FloeResult<usize> {
        let encrypted = self.encryptor.encrypt(bytes)?;
        let len = encrypted.len();
        self.store
            .put(&Path::from(location), encrypted.into())
            .await?;
        Ok(len)
    }

    /// Read the full content of the file at `location`.
    pub async fn get(&self, location: &str) -> FloeResult<Bytes> {
        let data = self.store.get(&Path::from(location)).await?.bytes().await?;
        self.encryptor.decrypt(data)
    }

    /// Delete the file at `location`. Missing files are not an error.
    pub async fn delete(&self, location: &str) -> FloeResult<()> {
        match self.store.delete(&Path::from(location)).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete the file at `location`, retrying transient store failures.
    ///
    /// Deletes without preconditions are idempotent, so retrying a generic
    /// failure cannot produce a different outcome than the first attempt.
    pub async fn delete_with_retries(
        &self,
        location: &str,
        max_retries: usize,
    ) -> FloeResult<()> {
        let path = Path::from(location);
        let mut attempt_number = 1;
        loop {
            match self.store.delete(&path).await {
                Ok(()) | Err(ObjectStoreError::NotFound { .. }) => return Ok(()),
                Err(err) if attempt_number >= max_retries => return Err(err.into()),
                Err(ObjectStoreError::Generic { store, source }) => {
                    debug!("delete attempt {attempt_number} failed: {store} {source}");
                    attempt_number += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl std::fmt::Debug for FileIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIo").finish_non_exhaustive()
    }
}
