//! Authenticated encryption for path components and persisted JSON blobs.
//!
//! A single `CryptoProvider` is constructed once at process start from the
//! 32-byte key in `fernet.key` and threaded by reference into the FS layer
//! and the two JSON stores (spec §9, "Scoped state & singletons", no
//! process-wide singleton). Every encryption is randomised: two calls on
//! identical input never produce the same token, because a fresh 96-bit
//! nonce is drawn per call and prepended to the ciphertext before the whole
//! thing is url-safe base64 encoded. The encoded token is itself a legal
//! path component, so the same primitive serves both "encrypt a directory
//! name" and "encrypt a JSON document".

use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::error::{SfsError, SfsResult};

const NONCE_LEN: usize = 12;
pub const ENCRYPTED_PREFIX: &str = "encrypted_";

pub struct CryptoProvider {
    key: Zeroizing<[u8; 32]>,
    cipher: Aes256Gcm,
}

impl CryptoProvider {
    /// Loads the base64-urlsafe 32-byte key from `key_path` (conventionally
    /// `fernet.key` at the process CWD) and builds the AES-256-GCM cipher.
    pub fn load(key_path: &Path) -> SfsResult<Self> {
        let encoded = fs::read_to_string(key_path)?;
        let raw = URL_SAFE_NO_PAD
            .decode(encoded.trim().as_bytes())
            .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(encoded.trim().as_bytes()))
            .map_err(|e| SfsError::CryptoInvalid(format!("malformed key file: {e}")))?;

        if raw.len() != 32 {
            return Err(SfsError::CryptoInvalid(format!(
                "key must be 32 bytes, got {}",
                raw.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&raw);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));

        Ok(Self { key, cipher })
    }

    #[cfg(test)]
    pub fn from_key_bytes(raw: [u8; 32]) -> Self {
        let key = Zeroizing::new(raw);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
        Self { key, cipher }
    }

    /// Encrypts `plaintext` under a fresh random nonce and returns the
    /// url-safe base64 token `base64(nonce || ciphertext)`. Non-deterministic:
    /// two calls on the same input produce different tokens.
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Vec<u8> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        // Infallible: GCM encryption only fails on plaintexts far beyond any
        // payload this system handles.
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .expect("AES-256-GCM encryption failed");

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(nonce.as_slice());
        token.extend_from_slice(&ciphertext);

        URL_SAFE_NO_PAD.encode(token).into_bytes()
    }

    /// Decodes and authenticates a token produced by `encrypt_bytes`.
    /// Fails closed: any malformed base64, truncated nonce, or tag mismatch
    /// collapses to `CryptoInvalid` with no distinction exposed to callers.
    pub fn decrypt_bytes(&self, token: &[u8]) -> SfsResult<Vec<u8>> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| SfsError::CryptoInvalid(e.to_string()))?;

        if raw.len() < NONCE_LEN {
            return Err(SfsError::CryptoInvalid("token shorter than nonce".into()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(nonce.into(), ciphertext)
            .map_err(|_| SfsError::CryptoInvalid("decryption failed".into()))
    }

    /// Encrypts a single path component for storage as a directory/file name.
    pub fn encrypt_component(&self, plaintext: &str) -> String {
        // encrypt_bytes always returns a valid UTF-8 (base64) token.
        String::from_utf8(self.encrypt_bytes(plaintext.as_bytes())).expect("base64 token is utf8")
    }

    /// Trial-decrypts an on-disk component name; callers swallow the error
    /// to mean "not this one" per spec §4.2/§7.
    pub fn decrypt_component(&self, component: &std::ffi::OsStr) -> SfsResult<String> {
        let bytes = component
            .to_str()
            .ok_or_else(|| SfsError::CryptoInvalid("non-utf8 path component".into()))?
            .as_bytes();
        let plain = self.decrypt_bytes(bytes)?;
        String::from_utf8(plain).map_err(|e| SfsError::CryptoInvalid(e.to_string()))
    }

    /// Serialises `value` to canonical JSON, encrypts it, and writes it
    /// atomically to `<dir>/encrypted_<filename>`, stripping any
    /// pre-existing `encrypted_` prefix first so repeated calls never
    /// double it up.
    pub fn encrypt_json<T: Serialize>(&self, value: &T, out_path: &Path) -> SfsResult<()> {
        let dir = out_path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = out_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SfsError::BadInput("missing file name".into()))?;
        let stripped = file_name.strip_prefix(ENCRYPTED_PREFIX).unwrap_or(file_name);
        let target = dir.join(format!("{ENCRYPTED_PREFIX}{stripped}"));

        let plaintext = serde_json::to_vec(value)?;
        let token = self.encrypt_bytes(&plaintext);

        let tmp = target.with_extension("tmp");
        fs::write(&tmp, &token)?;
        fs::rename(&tmp, &target)?;

        Ok(())
    }

    /// Reads, decrypts, and parses the JSON document at `in_path`.
    pub fn decrypt_json<T: DeserializeOwned>(&self, in_path: &Path) -> SfsResult<T> {
        let token = fs::read(in_path)?;
        let plaintext = self.decrypt_bytes(&token)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// True iff the final path component begins with `encrypted_`. Governs
    /// the persistence *format* of the permissions/users stores only (it
    /// never applies to names inside the encrypted tree).
    pub fn is_encrypted(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(ENCRYPTED_PREFIX))
            .unwrap_or(false)
    }

    /// Exposes the raw key bytes for tests that need to construct a second
    /// provider over the same key (e.g. round-trip checks across process
    /// boundaries would use this).
    #[cfg(test)]
    pub fn key_bytes(&self) -> [u8; 32] {
        *self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> CryptoProvider {
        CryptoProvider::from_key_bytes([7u8; 32])
    }

    #[test]
    fn round_trips_bytes() {
        let p = provider();
        let token = p.encrypt_bytes(b"hello world");
        assert_eq!(p.decrypt_bytes(&token).unwrap(), b"hello world");
    }

    #[test]
    fn encryption_is_randomised() {
        let p = provider();
        let a = p.encrypt_bytes(b"same input");
        let b = p.encrypt_bytes(b"same input");
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_token_is_invalid() {
        let p = provider();
        let mut token = p.encrypt_bytes(b"secret");
        let last = token.len() - 1;
        token[last] ^= 0x01;
        assert!(matches!(p.decrypt_bytes(&token), Err(SfsError::CryptoInvalid(_))));
    }

    #[test]
    fn component_round_trips() {
        let p = provider();
        let enc = p.encrypt_component("notes");
        let dec = p.decrypt_component(std::ffi::OsStr::new(&enc)).unwrap();
        assert_eq!(dec, "notes");
    }

    #[test]
    fn is_encrypted_checks_prefix_only() {
        assert!(CryptoProvider::is_encrypted(Path::new(
            "json/encrypted_users.json"
        )));
        assert!(!CryptoProvider::is_encrypted(Path::new("json/users.json")));
    }

    #[test]
    fn encrypt_json_strips_existing_prefix_before_reprefixing() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider();
        let target = dir.path().join("encrypted_permissions.json");

        p.encrypt_json(&vec!["a".to_string(), "b".to_string()], &target)
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["encrypted_permissions.json".to_string()]);

        let decoded: Vec<String> = p.decrypt_json(&target).unwrap();
        assert_eq!(decoded, vec!["a".to_string(), "b".to_string()]);
    }
}
