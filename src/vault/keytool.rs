//! [`CredentialVault`] backed by the `openssl` and `keytool` tools.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::unistd::{Group, User, chown};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use super::pem::split_pem_chain;
use super::{CredentialVault, StoreOwner};
use crate::constants::{TLS_CERT_KEY, TRUSTSTORE_ALIAS_PREFIX};
use crate::error::{Error, Result};

/// Environment variable carrying store passwords to the tools, so they never
/// appear on a command line.
const STORE_PASSWORD_ENV: &str = "RELATION_STORE_PASSWORD";

/// Builds PKCS12 stores by shelling out to `openssl` and `keytool`.
#[derive(Debug, Clone)]
pub struct KeytoolVault {
    openssl: PathBuf,
    keytool: PathBuf,
}

impl Default for KeytoolVault {
    fn default() -> Self {
        Self::new()
    }
}

impl KeytoolVault {
    /// Use the tools found on `PATH`.
    pub fn new() -> Self {
        Self::with_tools("openssl", "keytool")
    }

    pub fn with_tools(openssl: impl Into<PathBuf>, keytool: impl Into<PathBuf>) -> Self {
        Self {
            openssl: openssl.into(),
            keytool: keytool.into(),
        }
    }

    async fn run(&self, tool: &Path, args: &[&str], password: &str) -> Result<()> {
        let output = Command::new(tool)
            .args(args)
            .env(STORE_PASSWORD_ENV, password)
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::Tool {
                tool: tool.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Temporary directory next to `target`, so the final rename stays on one
/// filesystem. Removed on drop, whatever happens.
fn staging_dir(target: &Path) -> Result<TempDir> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok(tempfile::Builder::new()
        .prefix(".store-staging")
        .tempdir_in(parent)?)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::Config(format!("path {} is not valid UTF-8", path.display())))
}

#[async_trait]
impl CredentialVault for KeytoolVault {
    async fn create_keystore(
        &self,
        path: &Path,
        password: &str,
        cert_chain: &str,
        key: &str,
    ) -> Result<()> {
        let leaf = split_pem_chain(cert_chain)
            .into_iter()
            .next()
            .ok_or_else(|| Error::malformed(TLS_CERT_KEY, "no certificate in chain"))?;

        let staging = staging_dir(path)?;
        let cert_file = staging.path().join("cert.pem");
        let key_file = staging.path().join("key.pem");
        let export = staging.path().join("export.p12");
        let staged = staging.path().join("keystore.p12");
        tokio::fs::write(&cert_file, leaf).await?;
        tokio::fs::write(&key_file, key).await?;

        let pass_env = format!("env:{}", STORE_PASSWORD_ENV);
        self.run(
            &self.openssl,
            &[
                "pkcs12",
                "-export",
                "-in",
                path_str(&cert_file)?,
                "-inkey",
                path_str(&key_file)?,
                "-out",
                path_str(&export)?,
                "-name",
                "localhost",
                "-passout",
                &pass_env,
            ],
            password,
        )
        .await?;

        let store_pass = format!(":env {}", STORE_PASSWORD_ENV);
        let src_pass = format!("-srcstorepass{}", store_pass);
        let dest_pass = format!("-deststorepass{}", store_pass);
        let key_pass = format!("-destkeypass{}", store_pass);
        let mut args: Vec<&str> = vec![
            "-importkeystore",
            "-noprompt",
            "-srckeystore",
            path_str(&export)?,
            "-srcstoretype",
            "pkcs12",
            "-destkeystore",
            path_str(&staged)?,
            "-deststoretype",
            "pkcs12",
        ];
        // keytool expects "-opt:env VAR" as two arguments.
        for pass in [&src_pass, &dest_pass, &key_pass] {
            args.extend(pass.split(' '));
        }
        self.run(&self.keytool, &args, password).await?;

        tokio::fs::rename(&staged, path).await?;
        info!(path = %path.display(), "Keystore created");
        Ok(())
    }

    async fn create_truststore(
        &self,
        path: &Path,
        password: &str,
        certs: &[String],
        regenerate: bool,
    ) -> Result<()> {
        if !regenerate && tokio::fs::try_exists(path).await? {
            debug!(path = %path.display(), "Truststore exists, not regenerating");
            return Ok(());
        }
        if certs.is_empty() {
            return Err(Error::Config(format!(
                "no certificates to build truststore {}",
                path.display()
            )));
        }

        let staging = staging_dir(path)?;
        let staged = staging.path().join("truststore.p12");
        let store_pass = format!("-storepass:env {}", STORE_PASSWORD_ENV);
        for (i, cert) in certs.iter().enumerate() {
            let cert_file = staging.path().join(format!("ca-{}.pem", i));
            tokio::fs::write(&cert_file, cert).await?;
            let alias = format!("{}{}", TRUSTSTORE_ALIAS_PREFIX, i);
            let mut args: Vec<&str> = vec![
                "-import",
                "-noprompt",
                "-trustcacerts",
                "-keystore",
                path_str(&staged)?,
                "-storetype",
                "pkcs12",
                "-alias",
                &alias,
                "-file",
                path_str(&cert_file)?,
            ];
            args.extend(store_pass.split(' '));
            self.run(&self.keytool, &args, password).await?;
        }

        tokio::fs::rename(&staged, path).await?;
        info!(path = %path.display(), certificates = certs.len(), "Truststore rebuilt");
        Ok(())
    }

    async fn set_file_permissions(&self, path: &Path, owner: &StoreOwner) -> Result<()> {
        let uid = match &owner.user {
            Some(name) => Some(
                User::from_name(name)?
                    .ok_or_else(|| Error::Config(format!("unknown user '{}'", name)))?
                    .uid,
            ),
            None => None,
        };
        let gid = match &owner.group {
            Some(name) => Some(
                Group::from_name(name)?
                    .ok_or_else(|| Error::Config(format!("unknown group '{}'", name)))?
                    .gid,
            ),
            None => None,
        };
        if uid.is_some() || gid.is_some() {
            chown(path, uid, gid)?;
        }
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(owner.mode)).await?;
        Ok(())
    }
}
