//! HashiCorp Vault implementation of the secret store adapter.
//!
//! Application binds become logins against an auth method (AppRole or
//! userpass). End-user binds read a KV record and compare its password field.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::{auth, kv1, kv2};

use crate::config::{AppAuthMethod, AuthenticationConfig, UserLookupConfig, VaultConfig};
use crate::error::AuthError;

use super::{SecretStore, SecretStoreConnector, SessionToken};

/// Creates one [`VaultSecretStore`] per client connection.
#[derive(Debug, Clone)]
pub struct VaultConnector {
    vault: VaultConfig,
    authentication: AuthenticationConfig,
    users: UserLookupConfig,
}

impl VaultConnector {
    /// Create a connector from the relevant configuration sections.
    #[must_use]
    pub fn new(
        vault: VaultConfig,
        authentication: AuthenticationConfig,
        users: UserLookupConfig,
    ) -> Self {
        Self {
            vault,
            authentication,
            users,
        }
    }

    fn build_client(&self) -> Result<VaultClient, AuthError> {
        // The settings builder panics on an unparsable address.
        if self.vault.parsed_address().is_none() {
            return Err(AuthError::Client(format!(
                "invalid vault address '{}'",
                self.vault.address
            )));
        }

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder
            .address(self.vault.address.trim())
            .timeout(Some(self.vault.request_timeout()))
            .verify(self.vault.verify_tls);

        if let Some(token) = self.vault.token() {
            settings_builder.token(token);
        }

        if let Some(ref namespace) = self.vault.namespace {
            settings_builder.namespace(Some(namespace.clone()));
        }

        let settings = settings_builder
            .build()
            .map_err(|e| AuthError::Client(format!("invalid vault settings: {e}")))?;

        VaultClient::new(settings).map_err(|e| AuthError::Client(e.to_string()))
    }
}

impl SecretStoreConnector for VaultConnector {
    fn connect(&self) -> Result<Box<dyn SecretStore>, AuthError> {
        let client = self.build_client()?;
        Ok(Box::new(VaultSecretStore {
            client,
            app_method: self.authentication.app_method,
            app_mount: self.authentication.app_mount().to_string(),
            users: self.users.clone(),
        }))
    }
}

/// Vault-backed secret store handle for a single connection.
pub struct VaultSecretStore {
    client: VaultClient,
    app_method: AppAuthMethod,
    app_mount: String,
    users: UserLookupConfig,
}

impl fmt::Debug for VaultSecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSecretStore")
            .field("client", &"[VaultClient]")
            .field("app_method", &self.app_method)
            .field("app_mount", &self.app_mount)
            .field("kv_mount", &self.users.kv_mount)
            .finish()
    }
}

impl VaultSecretStore {
    async fn read_record(
        &self,
        path: &str,
    ) -> Result<HashMap<String, Value>, ClientError> {
        let mount = self.users.kv_mount.trim_matches('/');
        if self.users.kv_version == 2 {
            kv2::read(&self.client, mount, path).await
        } else {
            kv1::get(&self.client, mount, path).await
        }
    }
}

#[async_trait]
impl SecretStore for VaultSecretStore {
    async fn authenticate_application(
        &self,
        identity: &str,
        credential: &str,
    ) -> Result<SessionToken, AuthError> {
        debug!(
            method = ?self.app_method,
            mount = %self.app_mount,
            identity = %identity,
            "vault application login"
        );

        let result = match self.app_method {
            AppAuthMethod::AppRole => {
                auth::approle::login(&self.client, &self.app_mount, identity, credential).await
            }
            AppAuthMethod::Userpass => {
                auth::userpass::login(&self.client, &self.app_mount, identity, credential).await
            }
        };

        match result {
            Ok(info) => Ok(SessionToken::new(info.client_token)),
            Err(e) => {
                warn!(
                    identity = %identity,
                    error = %describe(&e),
                    "vault application login failed"
                );
                Err(login_error(e))
            }
        }
    }

    async fn authenticate_user(&self, key: &str, credential: &str) -> Result<bool, AuthError> {
        let Some(path) = self.users.record_path(key) else {
            warn!(key = %key, "refusing user lookup outside the users path");
            return Ok(false);
        };
        debug!(
            mount = %self.users.kv_mount,
            kv_version = self.users.kv_version,
            path = %path,
            "vault user record lookup"
        );

        match self.read_record(&path).await {
            Ok(record) => Ok(matches!(
                record.get(&self.users.password_field),
                Some(Value::String(stored)) if stored == credential
            )),
            Err(ClientError::APIError { code: 404, .. }) => {
                debug!(path = %path, "no credential record");
                Ok(false)
            }
            Err(e) => Err(AuthError::Backend(describe(&e))),
        }
    }

    fn set_token(&mut self, token: &SessionToken) {
        self.client.set_token(token.expose());
    }
}

/// Rejections (4xx) keep Vault's own message; everything else is a backend failure.
fn login_error(err: ClientError) -> AuthError {
    match err {
        ClientError::APIError { code, ref errors } if (400..500).contains(&code) => {
            if errors.is_empty() {
                AuthError::Rejected(format!("permission denied (status {code})"))
            } else {
                AuthError::Rejected(errors.join("; "))
            }
        }
        other => AuthError::Backend(describe(&other)),
    }
}

fn describe(err: &ClientError) -> String {
    match err {
        ClientError::APIError { code, errors } if !errors.is_empty() => {
            format!("{} (status {code})", errors.join("; "))
        }
        other => other.to_string(),
    }
}
