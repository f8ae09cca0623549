//! Small versioned key-value store per feature.
//!
//! Each key is one file under `<root>/<feature>/datastore_v0/`, holding a
//! [`VersionedRecord`]. Reads distinguish "no usable data" (`Ok(None)`) from
//! a damaged file (`Err`).

use crate::error::{CoreError, CoreResult};
use crate::executor::PersistenceExecutor;
use crate::file::fs;
use crate::logger::{InternalLogger, LogLevel, LogTarget};
use crate::storage::{PersistenceContext, DEFAULT_CALL_TIMEOUT};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use telepipe_codec::{Deserializer, Serializer, VersionedRecord};
use telepipe_storage::{EncryptedFileReaderWriter, Encryption, FileReaderWriter, PlainFileReaderWriter};

/// Directory name of the datastore inside a feature directory.
pub const DATASTORE_DIR: &str = "datastore_v0";

/// A value read back from the datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStoreContent<T> {
    /// Version the value was written with.
    pub version: u32,
    /// The value.
    pub data: T,
}

struct Handler {
    dir: PathBuf,
    files: Arc<dyn FileReaderWriter>,
    logger: Arc<dyn InternalLogger>,
}

impl Handler {
    fn path(&self, key: &str) -> CoreResult<PathBuf> {
        if fs::is_valid_file_name(key) {
            Ok(self.dir.join(key))
        } else {
            Err(CoreError::invalid_key(key))
        }
    }

    fn log(&self, message: &str, error: Option<&(dyn std::error::Error + 'static)>) {
        self.logger
            .log(LogLevel::Warn, &[LogTarget::Maintainer], message, error);
    }

    fn set_value<T: ?Sized>(
        &self,
        key: &str,
        value: &T,
        version: u32,
        serializer: &dyn Serializer<T>,
    ) -> CoreResult<()> {
        self.path(key)?;
        let data = serializer.serialize(value)?;
        self.write_record(key, version, data)
    }

    fn write_record(&self, key: &str, version: u32, data: Vec<u8>) -> CoreResult<()> {
        let path = self.path(key)?;
        let bytes = VersionedRecord::new(version, data).encode()?;
        std::fs::create_dir_all(&self.dir)?;
        self.files.write_data(&path, &bytes, false)?;
        Ok(())
    }

    fn value<T>(
        &self,
        key: &str,
        version: Option<u32>,
        deserializer: &dyn Deserializer<T>,
    ) -> CoreResult<Option<DataStoreContent<T>>> {
        match self.read_record(key, version)? {
            Some(record) => Ok(self.decode(key, record, deserializer)),
            None => Ok(None),
        }
    }

    fn read_record(&self, key: &str, version: Option<u32>) -> CoreResult<Option<VersionedRecord>> {
        let path = self.path(key)?;
        if !fs::exists(&path, self.logger.as_ref()) {
            return Ok(None);
        }

        let bytes = self.files.read_data(&path)?;
        let record = match VersionedRecord::decode(&bytes) {
            Ok(record) => record,
            Err(e) => {
                self.log(&format!("Datastore entry {key} is malformed"), Some(&e));
                return Err(e.into());
            }
        };

        if let Some(expected) = version {
            if record.version != expected {
                self.log(
                    &format!(
                        "Datastore entry {key} has version {} instead of {expected}, deleting it",
                        record.version
                    ),
                    None,
                );
                fs::delete(&path, self.logger.as_ref());
                return Ok(None);
            }
        }
        Ok(Some(record))
    }

    fn decode<T>(
        &self,
        key: &str,
        record: VersionedRecord,
        deserializer: &dyn Deserializer<T>,
    ) -> Option<DataStoreContent<T>> {
        match deserializer.deserialize(&record.data) {
            Ok(data) => Some(DataStoreContent {
                version: record.version,
                data,
            }),
            Err(e) => {
                self.log(&format!("Datastore entry {key} could not be decoded"), Some(&e));
                None
            }
        }
    }

    fn remove_value(&self, key: &str) -> CoreResult<()> {
        let path = self.path(key)?;
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn clear_all(&self) -> CoreResult<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = fs::list_files(&self.dir, self.logger.as_ref())
            .iter()
            .filter_map(|path| path.file_name()?.to_str().map(str::to_owned))
            .filter(|name| fs::is_valid_file_name(name))
            .collect();
        keys.sort();
        keys
    }
}

/// Versioned key-value storage of one feature.
///
/// Within a pipeline every file access runs on the persistence executor, so
/// plain and `_async` calls on the same key apply in the order they were
/// made. The plain methods wait for the executor and must not be called from
/// a persistence task. The `_async` variants hand their result to a callback
/// and never block.
///
/// Values are serialized and deserialized on the calling thread.
pub struct DataStore {
    handler: Arc<Handler>,
    executor: Option<Arc<PersistenceExecutor>>,
    call_timeout: Duration,
}

impl DataStore {
    /// Opens the datastore stored in `dir`, without an executor.
    ///
    /// The synchronous methods access the files on the calling thread; the
    /// `_async` variants fail with [`CoreError::ExecutorClosed`].
    pub fn open(
        dir: impl Into<PathBuf>,
        files: Arc<dyn FileReaderWriter>,
        logger: Arc<dyn InternalLogger>,
    ) -> Self {
        Self {
            handler: Arc::new(Handler {
                dir: dir.into(),
                files,
                logger,
            }),
            executor: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Opens the datastore of `feature` within a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFeatureName`] if `feature` is not a plain
    /// file name.
    pub fn for_feature(
        context: &PersistenceContext,
        feature: &str,
        encryption: Option<Arc<dyn Encryption>>,
    ) -> CoreResult<Self> {
        if !fs::is_valid_file_name(feature) {
            return Err(CoreError::InvalidFeatureName {
                name: feature.to_string(),
            });
        }
        let files: Arc<dyn FileReaderWriter> = match encryption {
            Some(encryption) => Arc::new(EncryptedFileReaderWriter::new(
                PlainFileReaderWriter::new(),
                encryption,
            )),
            None => Arc::new(PlainFileReaderWriter::new()),
        };
        let mut store = Self::open(
            context.root.join(feature).join(DATASTORE_DIR),
            files,
            Arc::clone(&context.logger),
        );
        store.executor = Some(Arc::clone(&context.executor));
        store.call_timeout = context.call_timeout;
        Ok(store)
    }

    /// Directory holding the entries.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.handler.dir
    }

    /// Writes `value` under `key`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid, the value cannot be
    /// serialized, or the file cannot be written.
    pub fn set_value<T: ?Sized>(
        &self,
        key: &str,
        value: &T,
        version: u32,
        serializer: &dyn Serializer<T>,
    ) -> CoreResult<()> {
        self.handler.path(key)?;
        let data = serializer.serialize(value)?;
        let key = key.to_string();
        self.on_worker("datastore-set", move |handler| {
            handler.write_record(&key, version, data)
        })
    }

    /// Reads the entry under `key`.
    ///
    /// Returns `Ok(None)` if there is no entry, if its version differs from
    /// `version` (the stale entry is deleted), or if its data cannot be
    /// deserialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid, the file cannot be read, or
    /// it is not a well-formed versioned record.
    pub fn value<T>(
        &self,
        key: &str,
        version: Option<u32>,
        deserializer: &dyn Deserializer<T>,
    ) -> CoreResult<Option<DataStoreContent<T>>> {
        let owned = key.to_string();
        let record = self.on_worker("datastore-get", move |handler| {
            handler.read_record(&owned, version)
        })?;
        Ok(record.and_then(|record| self.handler.decode(key, record, deserializer)))
    }

    /// Deletes the entry under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the file cannot be deleted.
    pub fn remove_value(&self, key: &str) -> CoreResult<()> {
        let key = key.to_string();
        self.on_worker("datastore-remove", move |handler| handler.remove_value(&key))
    }

    /// Deletes every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be deleted.
    pub fn clear_all(&self) -> CoreResult<()> {
        self.on_worker("datastore-clear", Handler::clear_all)
    }

    /// Keys currently stored, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.handler.keys()
    }

    fn on_worker<R, F>(&self, name: &str, f: F) -> CoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Handler) -> CoreResult<R> + Send + 'static,
    {
        match &self.executor {
            Some(executor) => {
                let handler = Arc::clone(&self.handler);
                executor.call(name, self.call_timeout, move || f(&handler))?
            }
            None => f(&self.handler),
        }
    }

    fn executor(&self) -> CoreResult<&PersistenceExecutor> {
        self.executor.as_deref().ok_or(CoreError::ExecutorClosed)
    }

    /// Writes on the persistence executor, then calls `callback`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExecutorClosed`] if the write cannot be queued.
    pub fn set_value_async<T, F>(
        &self,
        key: impl Into<String>,
        value: T,
        version: u32,
        serializer: Arc<dyn Serializer<T>>,
        callback: F,
    ) -> CoreResult<()>
    where
        T: Send + 'static,
        F: FnOnce(CoreResult<()>) + Send + 'static,
    {
        let handler = Arc::clone(&self.handler);
        let key = key.into();
        self.executor()?
            .submit_control(format!("datastore-set-{key}"), move || {
                callback(handler.set_value(&key, &value, version, serializer.as_ref()));
            })
    }

    /// Reads on the persistence executor, then calls `callback`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExecutorClosed`] if the read cannot be queued.
    pub fn value_async<T, F>(
        &self,
        key: impl Into<String>,
        version: Option<u32>,
        deserializer: Arc<dyn Deserializer<T>>,
        callback: F,
    ) -> CoreResult<()>
    where
        T: Send + 'static,
        F: FnOnce(CoreResult<Option<DataStoreContent<T>>>) + Send + 'static,
    {
        let handler = Arc::clone(&self.handler);
        let key = key.into();
        self.executor()?
            .submit_control(format!("datastore-get-{key}"), move || {
                callback(handler.value(&key, version, deserializer.as_ref()));
            })
    }

    /// Deletes on the persistence executor, then calls `callback`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExecutorClosed`] if the delete cannot be queued.
    pub fn remove_value_async<F>(&self, key: impl Into<String>, callback: F) -> CoreResult<()>
    where
        F: FnOnce(CoreResult<()>) + Send + 'static,
    {
        let handler = Arc::clone(&self.handler);
        let key = key.into();
        self.executor()?
            .submit_control(format!("datastore-remove-{key}"), move || {
                callback(handler.remove_value(&key));
            })
    }

    /// Deletes every entry on the persistence executor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExecutorClosed`] if the task cannot be queued.
    pub fn clear_all_async<F>(&self, callback: F) -> CoreResult<()>
    where
        F: FnOnce(CoreResult<()>) + Send + 'static,
    {
        let handler = Arc::clone(&self.handler);
        self.executor()?
            .submit_control("datastore-clear", move || callback(handler.clear_all()))
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("dir", &self.handler.dir)
            .field("async", &self.executor.is_some())
            .finish()
    }
}
