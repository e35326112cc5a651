//! Encrypted block I/O (Component A).
//!
//! Authenticates and encrypts fixed-name blobs to an untrusted host
//! filesystem with AES-GCM-128 and a fixed all-zero IV. Per §9 this is
//! sound only because each logical blob is encrypted under a key
//! distinct to that blob name: we derive a per-blob key from the
//! server's sealed disk key via AES-CMAC, so reusing the zero IV never
//! reuses a (key, IV) pair.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use zeroize::Zeroize;

use crate::crypto::kdf::{cmac_tag, Key128};
use crate::error::{CredbError, Result};

const ZERO_NONCE: [u8; 12] = [0u8; 12];
const TAG_LEN: usize = 16;

/// The enclave's sealed disk key (zeroized on drop).
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct DiskKey(pub [u8; 16]);

fn derive_blob_key(disk_key: &DiskKey, name: &str) -> Key128 {
    let tag = cmac_tag(&Key128(disk_key.0), name.as_bytes());
    Key128(tag)
}

/// `read`/`write` over named blobs, authenticated end to end.
pub trait BlockStore: Send + Sync {
    /// Reads and decrypts a blob. Returns `Ok(None)` if it does not exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;
    /// Encrypts and writes a blob, replacing any prior content.
    fn write(&self, name: &str, data: &[u8]) -> Result<()>;
    /// Untrusted advisory count of files on disk.
    fn num_files(&self) -> usize;
    /// Untrusted advisory total size in bytes of files on disk.
    fn total_size(&self) -> u64;
}

/// A `BlockStore` backed by the local filesystem.
pub struct LocalBlockStore {
    root: PathBuf,
    disk_key: DiskKey,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl LocalBlockStore {
    /// Opens (creating if absent) a block store rooted at `root`,
    /// encrypting with `disk_key`.
    pub fn open(root: impl Into<PathBuf>, disk_key: DiskKey) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            disk_key,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl BlockStore for LocalBlockStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name);
        let raw = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CredbError::Io(e)),
        };
        self.reads.fetch_add(1, Ordering::Relaxed);
        if raw.len() < TAG_LEN {
            return Err(CredbError::integrity("blob shorter than authentication tag"));
        }
        let (tag, ciphertext) = raw.split_at(TAG_LEN);

        let key = derive_blob_key(&self.disk_key, name);
        let cipher = Aes128Gcm::new_from_slice(key.as_bytes()).expect("16-byte key");
        // RustCrypto's AEAD API expects ciphertext||tag; the on-disk
        // layout is tag||ciphertext, so splice them back into that order.
        let mut combined = Vec::with_capacity(raw.len());
        combined.extend_from_slice(ciphertext);
        combined.extend_from_slice(tag);
        let nonce = Nonce::from_slice(&ZERO_NONCE);
        let plaintext = cipher
            .decrypt(nonce, combined.as_slice())
            .map_err(|_| CredbError::integrity("authentication tag mismatch"))?;
        Ok(Some(plaintext))
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        let key = derive_blob_key(&self.disk_key, name);
        let cipher = Aes128Gcm::new_from_slice(key.as_bytes()).expect("16-byte key");
        let nonce = Nonce::from_slice(&ZERO_NONCE);
        let combined = cipher
            .encrypt(nonce, data)
            .map_err(|_| CredbError::integrity("encryption failure"))?;
        let (ciphertext, tag) = combined.split_at(combined.len() - TAG_LEN);
        let mut out = Vec::with_capacity(combined.len());
        out.extend_from_slice(tag);
        out.extend_from_slice(ciphertext);

        let tmp = self.path_for(&format!("{name}.tmp"));
        fs::write(&tmp, &out)?;
        fs::rename(&tmp, self.path_for(name))?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn num_files(&self) -> usize {
        fs::read_dir(&self.root)
            .map(|it| it.filter_map(|e| e.ok()).count())
            .unwrap_or(0)
    }

    fn total_size(&self) -> u64 {
        fs::read_dir(&self.root)
            .map(|it| {
                it.filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Checks a directory is usable as a block store root without opening it.
pub fn blob_path(root: impl AsRef<Path>, name: &str) -> PathBuf {
    root.as_ref().join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_read_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlockStore::open(dir.path(), DiskKey([0x42; 16])).unwrap();
        store.write("000.page", b"page payload bytes").unwrap();
        let read_back = store.read("000.page").unwrap().unwrap();
        assert_eq!(read_back, b"page payload bytes");
    }

    #[test]
    fn missing_blob_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlockStore::open(dir.path(), DiskKey([0x01; 16])).unwrap();
        assert!(store.read("absent.page").unwrap().is_none());
    }

    #[test]
    fn tampered_blob_fails_integrity_check() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlockStore::open(dir.path(), DiskKey([0x9; 16])).unwrap();
        store.write("a.page", b"original content").unwrap();
        let path = dir.path().join("a.page");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = store.read("a.page").unwrap_err();
        assert!(matches!(err, CredbError::Integrity(_)));
    }

    #[test]
    fn distinct_blobs_use_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlockStore::open(dir.path(), DiskKey([0x5; 16])).unwrap();
        store.write("one", b"same-plaintext-bytes").unwrap();
        store.write("two", b"same-plaintext-bytes").unwrap();
        let one = std::fs::read(dir.path().join("one")).unwrap();
        let two = std::fs::read(dir.path().join("two")).unwrap();
        assert_ne!(one, two);
    }
}
