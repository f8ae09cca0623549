//! Encryption at rest for batch and metadata files.
//!
//! ## Security Model
//!
//! - Each event's data and metadata are encrypted independently
//! - Ciphertext layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//! - Metadata sidecars are encrypted as a whole and can only be replaced,
//!   never appended to
//! - Keys are never stored; the host application provides them

use crate::batch::{parse_events, BatchFileContents, BatchFileReaderWriter};
use crate::error::{StorageError, StorageResult};
use crate::event::RawBatchEvent;
use crate::file::{FileReader, FileWriter};
use std::path::Path;
use std::sync::Arc;

/// Encrypts and decrypts opaque byte buffers.
pub trait Encryption: Send + Sync {
    /// Encrypts `plaintext`.
    fn encrypt(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>>;

    /// Decrypts data produced by [`Encryption::encrypt`].
    fn decrypt(&self, ciphertext: &[u8]) -> StorageResult<Vec<u8>>;
}

#[cfg(feature = "encryption")]
pub use aes::{AesGcmEncryption, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

#[cfg(feature = "encryption")]
mod aes {
    use super::Encryption;
    use crate::error::{StorageError, StorageResult};
    use aes_gcm::{
        aead::{generic_array::GenericArray, Aead, KeyInit},
        Aes256Gcm, Nonce,
    };
    use rand::RngCore;
    use zeroize::{Zeroize, ZeroizeOnDrop};

    /// Size of the AES-256 key in bytes.
    pub const KEY_SIZE: usize = 32;
    /// Size of the GCM nonce in bytes.
    pub const NONCE_SIZE: usize = 12;
    /// Size of the GCM authentication tag in bytes.
    pub const TAG_SIZE: usize = 16;

    /// Encryption key for AES-256-GCM.
    ///
    /// Zeroized when dropped.
    #[derive(Clone, Zeroize, ZeroizeOnDrop)]
    pub struct EncryptionKey {
        bytes: [u8; KEY_SIZE],
    }

    impl EncryptionKey {
        /// Generates a new random key.
        #[must_use]
        pub fn generate() -> Self {
            let mut bytes = [0u8; KEY_SIZE];
            rand::thread_rng().fill_bytes(&mut bytes);
            Self { bytes }
        }

        /// Creates a key from raw bytes.
        ///
        /// # Errors
        ///
        /// Returns an error if `bytes` is not exactly 32 bytes.
        pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
            if bytes.len() != KEY_SIZE {
                return Err(StorageError::encryption(format!(
                    "invalid key size: expected {KEY_SIZE}, got {}",
                    bytes.len()
                )));
            }
            let mut key_bytes = [0u8; KEY_SIZE];
            key_bytes.copy_from_slice(bytes);
            Ok(Self { bytes: key_bytes })
        }

        /// Derives a key from a secret using HKDF-SHA256.
        ///
        /// HKDF assumes high-entropy input. It is not a password hash.
        pub fn derive(secret: &[u8], salt: &[u8]) -> StorageResult<Self> {
            use hkdf::Hkdf;
            use sha2::Sha256;

            let hk = Hkdf::<Sha256>::new(Some(salt), secret);
            let mut bytes = [0u8; KEY_SIZE];
            hk.expand(b"telepipe-batch-key-v1", &mut bytes)
                .map_err(|_| StorageError::encryption("HKDF expand failed"))?;
            Ok(Self { bytes })
        }

        /// Returns the raw key bytes.
        #[must_use]
        pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
            &self.bytes
        }
    }

    impl std::fmt::Debug for EncryptionKey {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("EncryptionKey")
                .field("bytes", &"[REDACTED]")
                .finish()
        }
    }

    /// AES-256-GCM with a random nonce per call.
    pub struct AesGcmEncryption {
        cipher: Aes256Gcm,
    }

    impl AesGcmEncryption {
        /// Creates a cipher for `key`.
        #[must_use]
        pub fn new(key: &EncryptionKey) -> Self {
            let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
            Self { cipher }
        }
    }

    impl std::fmt::Debug for AesGcmEncryption {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("AesGcmEncryption")
                .field("cipher", &"Aes256Gcm")
                .finish()
        }
    }

    impl Encryption for AesGcmEncryption {
        fn encrypt(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
            let mut nonce_bytes = [0u8; NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce_bytes);
            let nonce = Nonce::from_slice(&nonce_bytes);

            let ciphertext = self
                .cipher
                .encrypt(nonce, plaintext)
                .map_err(|_| StorageError::encryption("encryption error"))?;

            let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
            out.extend_from_slice(&nonce_bytes);
            out.extend(ciphertext);
            Ok(out)
        }

        fn decrypt(&self, ciphertext: &[u8]) -> StorageResult<Vec<u8>> {
            if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
                return Err(StorageError::encryption("ciphertext too short"));
            }
            let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
            self.cipher
                .decrypt(nonce, &ciphertext[NONCE_SIZE..])
                .map_err(|_| StorageError::encryption("decryption error"))
        }
    }
}

/// Encrypts whole metadata files.
pub struct EncryptedFileReaderWriter<D> {
    delegate: D,
    encryption: Arc<dyn Encryption>,
}

impl<D> EncryptedFileReaderWriter<D> {
    /// Wraps `delegate` so content is encrypted before it reaches disk.
    pub fn new(delegate: D, encryption: Arc<dyn Encryption>) -> Self {
        Self {
            delegate,
            encryption,
        }
    }
}

impl<D: FileReader> FileReader for EncryptedFileReaderWriter<D> {
    fn read_data(&self, file: &Path) -> StorageResult<Vec<u8>> {
        let raw = self.delegate.read_data(file)?;
        if raw.is_empty() {
            return Ok(raw);
        }
        self.encryption.decrypt(&raw)
    }
}

impl<D: FileWriter> FileWriter for EncryptedFileReaderWriter<D> {
    fn write_data(&self, file: &Path, data: &[u8], append: bool) -> StorageResult<()> {
        if append {
            return Err(StorageError::Unsupported(
                "append is not supported for encrypted files".into(),
            ));
        }
        let encrypted = self.encryption.encrypt(data)?;
        self.delegate.write_data(file, &encrypted, false)
    }
}

/// Encrypts each event's data and metadata before framing.
pub struct EncryptedBatchFileReaderWriter<D> {
    delegate: D,
    encryption: Arc<dyn Encryption>,
}

impl<D> EncryptedBatchFileReaderWriter<D> {
    /// Wraps `delegate` so event payloads are encrypted on disk.
    pub fn new(delegate: D, encryption: Arc<dyn Encryption>) -> Self {
        Self {
            delegate,
            encryption,
        }
    }
}

impl<D: BatchFileReaderWriter> BatchFileReaderWriter for EncryptedBatchFileReaderWriter<D> {
    fn write_event(&self, file: &Path, event: &RawBatchEvent, append: bool) -> StorageResult<()> {
        let encrypted = RawBatchEvent {
            data: encrypt_part(self.encryption.as_ref(), &event.data)?,
            metadata: encrypt_part(self.encryption.as_ref(), &event.metadata)?,
        };
        self.delegate.write_event(file, &encrypted, append)
    }

    fn read_events(&self, file: &Path) -> StorageResult<BatchFileContents> {
        let contents = self.delegate.read_events(file)?;
        Ok(decrypt_contents(contents, self.encryption.as_ref()))
    }
}

/// Decrypts a batch that was read into memory by other means.
pub fn decrypt_batch_bytes(bytes: &[u8], encryption: &dyn Encryption) -> BatchFileContents {
    decrypt_contents(parse_events(bytes), encryption)
}

fn encrypt_part(encryption: &dyn Encryption, part: &[u8]) -> StorageResult<Vec<u8>> {
    if part.is_empty() {
        return Ok(Vec::new());
    }
    encryption.encrypt(part)
}

fn decrypt_part(encryption: &dyn Encryption, part: &[u8]) -> StorageResult<Vec<u8>> {
    if part.is_empty() {
        return Ok(Vec::new());
    }
    encryption.decrypt(part)
}

fn decrypt_contents(mut contents: BatchFileContents, encryption: &dyn Encryption) -> BatchFileContents {
    let stored = std::mem::take(&mut contents.events);
    for event in stored {
        let data = decrypt_part(encryption, &event.data);
        let metadata = decrypt_part(encryption, &event.metadata);
        match (data, metadata) {
            (Ok(data), Ok(metadata)) => contents.events.push(RawBatchEvent { data, metadata }),
            _ => contents.undecryptable += 1,
        }
    }
    contents
}

#[cfg(all(test, feature = "encryption"))]
mod tests {
    use super::*;
    use crate::batch::PlainBatchFileReaderWriter;
    use crate::file::PlainFileReaderWriter;
    use tempfile::tempdir;

    fn cipher() -> Arc<dyn Encryption> {
        Arc::new(AesGcmEncryption::new(&EncryptionKey::generate()))
    }

    #[test]
    fn key_wrong_size() {
        assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
        assert!(EncryptionKey::from_bytes(&[0u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn derived_keys_are_deterministic() {
        let a = EncryptionKey::derive(b"secret", b"salt").unwrap();
        let b = EncryptionKey::derive(b"secret", b"salt").unwrap();
        let c = EncryptionKey::derive(b"secret", b"other").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn debug_redacts_key() {
        let key = EncryptionKey::generate();
        assert!(format!("{key:?}").contains("REDACTED"));
    }

    #[test]
    fn aes_roundtrip_and_random_nonce() {
        let enc = AesGcmEncryption::new(&EncryptionKey::generate());
        let a = enc.encrypt(b"same").unwrap();
        let b = enc.encrypt(b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), NONCE_SIZE + 4 + TAG_SIZE);
        assert_eq!(enc.decrypt(&a).unwrap(), b"same");
    }

    #[test]
    fn wrong_key_fails() {
        let a = AesGcmEncryption::new(&EncryptionKey::generate());
        let b = AesGcmEncryption::new(&EncryptionKey::generate());
        let ct = a.encrypt(b"secret").unwrap();
        assert!(b.decrypt(&ct).is_err());
    }

    #[test]
    fn encrypted_batch_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1000");
        let rw = EncryptedBatchFileReaderWriter::new(PlainBatchFileReaderWriter::new(), cipher());
        let events = vec![
            RawBatchEvent::with_metadata(b"a".to_vec(), b"meta".to_vec()),
            RawBatchEvent::new(b"b".to_vec()),
        ];
        for event in &events {
            rw.write_event(&path, event, true).unwrap();
        }

        let raw = std::fs::read(&path).unwrap();
        assert!(!raw.windows(4).any(|w| w == b"meta"));

        let contents = rw.read_events(&path).unwrap();
        assert_eq!(contents.events, events);
        assert!(contents.is_complete());
    }

    #[test]
    fn undecryptable_events_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1000");
        let writer = EncryptedBatchFileReaderWriter::new(PlainBatchFileReaderWriter::new(), cipher());
        writer
            .write_event(&path, &RawBatchEvent::new(b"lost".to_vec()), true)
            .unwrap();

        let reader = EncryptedBatchFileReaderWriter::new(PlainBatchFileReaderWriter::new(), cipher());
        let contents = reader.read_events(&path).unwrap();
        assert!(contents.events.is_empty());
        assert_eq!(contents.undecryptable, 1);
        assert!(!contents.is_complete());
    }

    #[test]
    fn encrypted_metadata_rejects_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1000_metadata");
        let rw = EncryptedFileReaderWriter::new(PlainFileReaderWriter::new(), cipher());

        rw.write_data(&path, b"meta", false).unwrap();
        assert_eq!(rw.read_data(&path).unwrap(), b"meta");
        assert!(matches!(
            rw.write_data(&path, b"more", true),
            Err(StorageError::Unsupported(_))
        ));
    }

    #[test]
    fn decrypt_batch_bytes_matches_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1000");
        let enc = cipher();
        let rw = EncryptedBatchFileReaderWriter::new(PlainBatchFileReaderWriter::new(), enc.clone());
        rw.write_event(&path, &RawBatchEvent::new(b"x".to_vec()), true)
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let contents = decrypt_batch_bytes(&bytes, enc.as_ref());
        assert_eq!(contents.events, vec![RawBatchEvent::new(b"x".to_vec())]);
    }
}
