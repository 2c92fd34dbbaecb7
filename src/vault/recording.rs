//! Vault that records calls instead of touching the filesystem.
//!
//! Available with the `test-utilities` feature or during unit tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CredentialVault, StoreOwner};
use crate::error::{Error, Result};

/// One recorded vault operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultCall {
    Keystore {
        path: PathBuf,
        password: String,
    },
    Truststore {
        path: PathBuf,
        password: String,
        certs: Vec<String>,
        regenerate: bool,
    },
    Permissions {
        path: PathBuf,
        owner: StoreOwner,
    },
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<VaultCall>,
    fail_with: Option<Error>,
}

/// Records every call. Cloning shares the recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingVault {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every store operation fail with `error` from now on.
    pub async fn fail_with(&self, error: Error) {
        self.inner.lock().await.fail_with = Some(error);
    }

    pub async fn calls(&self) -> Vec<VaultCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Certificates passed to the most recent truststore build.
    pub async fn last_truststore(&self) -> Option<Vec<String>> {
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .rev()
            .find_map(|c| match c {
                VaultCall::Truststore { certs, .. } => Some(certs.clone()),
                _ => None,
            })
    }

    pub async fn truststore_builds(&self) -> usize {
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| matches!(c, VaultCall::Truststore { .. }))
            .count()
    }

    async fn record(&self, call: VaultCall) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(err) = &inner.fail_with {
            return Err(err.clone());
        }
        inner.calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl CredentialVault for RecordingVault {
    async fn create_keystore(
        &self,
        path: &Path,
        password: &str,
        _cert_chain: &str,
        _key: &str,
    ) -> Result<()> {
        self.record(VaultCall::Keystore {
            path: path.to_path_buf(),
            password: password.to_string(),
        })
        .await
    }

    async fn create_truststore(
        &self,
        path: &Path,
        password: &str,
        certs: &[String],
        regenerate: bool,
    ) -> Result<()> {
        self.record(VaultCall::Truststore {
            path: path.to_path_buf(),
            password: password.to_string(),
            certs: certs.to_vec(),
            regenerate,
        })
        .await
    }

    async fn set_file_permissions(&self, path: &Path, owner: &StoreOwner) -> Result<()> {
        self.record(VaultCall::Permissions {
            path: path.to_path_buf(),
            owner: owner.clone(),
        })
        .await
    }
}
