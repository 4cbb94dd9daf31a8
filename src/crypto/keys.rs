use super::verifier::CertificateVerifier;
use crate::{DriveError, DriveResult};
use anyhow::{anyhow, Context, Result};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Owner read/write only
#[cfg(unix)]
const KEY_FILE_MODE: u32 = 0o600;

fn key_error(e: anyhow::Error) -> DriveError {
    DriveError::Key(format!("{:#}", e))
}

/// Ed25519 signing key held by the process for certificate issuance
pub struct SigningKey {
    key_pair: Ed25519KeyPair,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

impl SigningKey {
    /// Fresh in-memory key; nothing is written to disk
    pub fn generate() -> DriveResult<Self> {
        let pkcs8 = Self::generate_pkcs8().map_err(key_error)?;
        Self::from_pkcs8(&pkcs8)
    }

    pub fn from_pkcs8(pkcs8: &[u8]) -> DriveResult<Self> {
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|e| DriveError::Key(format!("rejected PKCS#8 document: {}", e)))?;
        Ok(Self { key_pair })
    }

    pub fn load(path: impl AsRef<Path>) -> DriveResult<Self> {
        let path = path.as_ref();
        let pkcs8 = Self::read_key_file(path).map_err(key_error)?;
        Self::from_pkcs8(&pkcs8)
    }

    /// Load the key at `path`, creating it (mode 0600) if absent
    pub fn load_or_generate(path: impl AsRef<Path>) -> DriveResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        let pkcs8 = Self::generate_pkcs8()
            .and_then(|pkcs8| Self::write_key_file(path, &pkcs8).map(|_| pkcs8))
            .map_err(key_error)?;

        let key = Self::from_pkcs8(&pkcs8)?;
        tracing::info!(
            path = %path.display(),
            public_key = %key.public_key_hex(),
            "generated new signing key"
        );
        Ok(key)
    }

    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key().as_ref()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// Verifier bound to this key's public half
    pub fn verifier(&self) -> CertificateVerifier {
        CertificateVerifier::from_public_key(self.public_key().to_vec())
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key_pair.sign(message).as_ref().to_vec()
    }

    fn generate_pkcs8() -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        let document = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| anyhow!("system RNG failed while generating key"))?;
        Ok(document.as_ref().to_vec())
    }

    fn read_key_file(path: &Path) -> Result<Vec<u8>> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(path)
                .with_context(|| format!("Failed to stat key file {}", path.display()))?
                .permissions()
                .mode();
            if mode & 0o077 != 0 {
                tracing::warn!(
                    path = %path.display(),
                    mode = %format!("{:o}", mode & 0o777),
                    "signing key is readable by group or others"
                );
            }
        }

        fs::read(path).with_context(|| format!("Failed to read key file {}", path.display()))
    }

    fn write_key_file(path: &Path, pkcs8: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create key directory {}", parent.display())
                })?;
            }
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(KEY_FILE_MODE);
        }

        let mut file = options
            .open(path)
            .with_context(|| format!("Failed to create key file {}", path.display()))?;
        file.write_all(pkcs8)
            .and_then(|_| file.sync_all())
            .with_context(|| format!("Failed to write key file {}", path.display()))
    }
}
