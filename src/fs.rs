//! Encrypted filesystem layer: plaintext logical paths resolve to encrypted
//! on-disk paths by trial-decryption, one component at a time, because
//! encryption is randomised and so cannot be looked up by hash (spec §4.2).
//!
//! On-disk *structure* is left unencrypted on purpose - only names and
//! file contents are protected. An attacker who can read the storage root
//! sees the shape of the tree, not what's in it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::crypto::CryptoProvider;
use crate::error::{SfsError, SfsResult};

/// One entry returned by `list_dir`: the opaque on-disk name, the
/// plaintext name when trial-decryption of it succeeded (else the opaque
/// name again, so the caller can surface "something is here" without
/// revealing what), and whether it's a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub encrypted_name: String,
    pub plain_name: String,
    pub is_folder: bool,
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

pub struct EncryptedFs {
    root: PathBuf,
    /// Per-session accelerator for trial-decryption, keyed on (parent dir,
    /// plaintext component) -> last-seen encrypted file name (spec §9,
    /// "amortise with a per-session cache ... invalidated on rename"). A
    /// cache hit is always re-checked against the live directory entry
    /// before use, so a stale entry (the target was renamed or removed
    /// since) just falls through to a full re-scan rather than lying.
    cache: RefCell<HashMap<(PathBuf, String), OsString>>,
}

impl EncryptedFs {
    pub fn new(root: impl Into<PathBuf>) -> SfsResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` to its on-disk counterpart, or `None` if any
    /// component has no matching entry. Entries whose name fails to
    /// decrypt under the current key are skipped silently, which is how a
    /// "not this one" mismatch is told apart from corruption at this layer
    /// (spec §7 propagation policy).
    pub fn find_path(&self, crypto: &CryptoProvider, path: &str) -> Option<PathBuf> {
        let mut curr = self.root.clone();
        for component in split_path(path) {
            curr = self.find_child(crypto, &curr, component)?;
        }
        Some(curr)
    }

    fn find_child(&self, crypto: &CryptoProvider, dir: &Path, plaintext: &str) -> Option<PathBuf> {
        let key = (dir.to_path_buf(), plaintext.to_string());
        if let Some(cached_name) = self.cache.borrow().get(&key) {
            let candidate = dir.join(cached_name);
            if candidate.exists() {
                return Some(candidate);
            }
        }

        let entries = fs::read_dir(dir).ok()?;
        for entry in entries {
            let entry = entry.ok()?;
            if let Ok(name) = crypto.decrypt_component(&entry.file_name()) {
                if name == plaintext {
                    self.cache.borrow_mut().insert(key, entry.file_name());
                    return Some(entry.path());
                }
            }
        }
        None
    }

    /// Resolves `path`, creating any missing intermediate directories (each
    /// a freshly-encrypted component) along the way. At the terminal
    /// position: if `is_file` is set, returns the path a file should be
    /// created at (without creating it; the caller writes the contents);
    /// otherwise creates the terminal directory too.
    pub fn make_path(&self, crypto: &CryptoProvider, path: &str, is_file: bool) -> SfsResult<PathBuf> {
        let components = split_path(path);
        let mut curr = self.root.clone();
        let last = components.len();

        for (i, component) in components.into_iter().enumerate() {
            let is_last = i + 1 == last;
            if is_last && is_file {
                return Ok(curr.join(crypto.encrypt_component(component)));
            }

            curr = match self.find_child(crypto, &curr, component) {
                Some(existing) => existing,
                None => {
                    let fresh = curr.join(crypto.encrypt_component(component));
                    fs::create_dir(&fresh)?;
                    self.cache
                        .borrow_mut()
                        .insert((curr.clone(), component.to_string()), fresh.file_name().unwrap().to_owned());
                    fresh
                }
            };
        }

        Ok(curr)
    }

    pub fn read_file(&self, crypto: &CryptoProvider, path: &str) -> SfsResult<String> {
        let on_disk = self
            .find_path(crypto, path)
            .ok_or_else(|| SfsError::NotFound(path.to_string()))?;

        if on_disk.is_dir() {
            return Err(SfsError::BadInput(format!("{path} is a directory")));
        }

        let ciphertext = fs::read(&on_disk)?;
        let plaintext = crypto.decrypt_bytes(&ciphertext)?;
        String::from_utf8(plaintext).map_err(|e| SfsError::CryptoInvalid(e.to_string()))
    }

    /// Writes `contents` as a single authenticated-encryption payload
    /// (never streamed), creating the file if it does not already exist.
    pub fn write_file(&self, crypto: &CryptoProvider, path: &str, contents: &str) -> SfsResult<()> {
        let on_disk = match self.find_path(crypto, path) {
            Some(p) => p,
            None => self.make_path(crypto, path, true)?,
        };

        if on_disk.is_dir() {
            return Err(SfsError::BadInput(format!("{path} is a directory")));
        }

        let ciphertext = crypto.encrypt_bytes(contents.as_bytes());
        fs::write(&on_disk, ciphertext)?;
        Ok(())
    }

    pub fn list_dir(&self, crypto: &CryptoProvider, path: &str) -> SfsResult<Vec<ListEntry>> {
        let on_disk = self
            .find_path(crypto, path)
            .ok_or_else(|| SfsError::NotFound(path.to_string()))?;

        if on_disk.is_file() {
            return Err(SfsError::BadInput(format!("{path} is not a directory")));
        }

        let mut out = Vec::new();
        for entry in fs::read_dir(&on_disk)? {
            let entry = entry?;
            let encrypted_name = entry.file_name().to_string_lossy().into_owned();
            let is_folder = entry.path().is_dir();
            let plain_name = crypto
                .decrypt_component(&entry.file_name())
                .unwrap_or_else(|_| encrypted_name.clone());

            out.push(ListEntry {
                encrypted_name,
                plain_name,
                is_folder,
            });
        }

        Ok(out)
    }

    /// Renames the on-disk entry to a fresh encryption of `new_name`.
    /// Does not move the entry across parents.
    pub fn rename(&self, crypto: &CryptoProvider, path: &str, new_name: &str) -> SfsResult<()> {
        let on_disk = self
            .find_path(crypto, path)
            .ok_or_else(|| SfsError::NotFound(path.to_string()))?;

        let parent = on_disk
            .parent()
            .ok_or_else(|| SfsError::Conflict("cannot rename storage root".into()))?;

        let new_path = parent.join(crypto.encrypt_component(new_name));
        fs::rename(&on_disk, &new_path)?;
        Ok(())
    }

    pub fn remove_file(&self, crypto: &CryptoProvider, path: &str) -> SfsResult<()> {
        let on_disk = self
            .find_path(crypto, path)
            .ok_or_else(|| SfsError::NotFound(path.to_string()))?;

        if on_disk.is_dir() {
            return Err(SfsError::BadInput(format!("{path} is a directory")));
        }

        fs::remove_file(&on_disk)?;
        Ok(())
    }

    /// Removes a directory; fails if it is not empty (no recursive delete).
    pub fn remove_dir(&self, crypto: &CryptoProvider, path: &str) -> SfsResult<()> {
        let on_disk = self
            .find_path(crypto, path)
            .ok_or_else(|| SfsError::NotFound(path.to_string()))?;

        if on_disk.is_file() {
            return Err(SfsError::BadInput(format!("{path} is not a directory")));
        }

        fs::remove_dir(&on_disk)?;
        Ok(())
    }

    pub fn is_folder(&self, crypto: &CryptoProvider, path: &str) -> SfsResult<bool> {
        let on_disk = self
            .find_path(crypto, path)
            .ok_or_else(|| SfsError::NotFound(path.to_string()))?;
        Ok(on_disk.is_dir())
    }

}
