//! Credential vault: passwords, keystores and truststores.
//!
//! The negotiation components never touch certificate tooling directly. They
//! go through [`CredentialVault`], which the crate implements with the
//! `openssl` and `keytool` command line tools ([`KeytoolVault`]). Tests use
//! [`RecordingVault`], which records calls instead of writing stores.
//!
//! # Atomicity
//!
//! Store creation is all-or-nothing. Implementations build the store in a
//! temporary directory next to the target and rename it into place, so a
//! failed tool invocation never leaves a partial store behind.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants::STORE_FILE_MODE;
use crate::error::Result;

pub mod keytool;
pub mod password;
pub mod pem;

#[cfg(any(test, feature = "test-utilities"))]
pub mod recording;

pub use keytool::KeytoolVault;
pub use password::gen_random_password;
pub use pem::{split_pem_chain, unique_certificates};

#[cfg(any(test, feature = "test-utilities"))]
pub use recording::{RecordingVault, VaultCall};

/// Ownership and mode applied to generated stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOwner {
    pub user: Option<String>,
    pub group: Option<String>,
    pub mode: u32,
}

impl Default for StoreOwner {
    fn default() -> Self {
        Self {
            user: None,
            group: None,
            mode: STORE_FILE_MODE,
        }
    }
}

/// Random passwords and TLS store management.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Alphanumeric password from a cryptographic source.
    fn gen_random_password(&self, len: usize) -> String {
        gen_random_password(len)
    }

    /// Build a PKCS12 keystore holding `key` and the first certificate of
    /// `cert_chain`.
    async fn create_keystore(
        &self,
        path: &Path,
        password: &str,
        cert_chain: &str,
        key: &str,
    ) -> Result<()>;

    /// Build a PKCS12 truststore holding every certificate in `certs`.
    ///
    /// An existing store is kept unless `regenerate` is set.
    async fn create_truststore(
        &self,
        path: &Path,
        password: &str,
        certs: &[String],
        regenerate: bool,
    ) -> Result<()>;

    /// Change owner, group and mode of `path`.
    async fn set_file_permissions(&self, path: &Path, owner: &StoreOwner) -> Result<()>;
}
