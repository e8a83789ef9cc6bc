//! Vault adapter tests against an emulated Vault HTTP API.
//!
//! These tests verify that binds turn into the right Vault calls:
//! - AppRole and userpass logins
//! - KV v1 and v2 record reads with the application's token
//! - Error classification for rejected logins and server failures

use std::sync::Arc;

use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ldap2vault_core::bridge::{AuthenticationBridge, BindStatus};
use ldap2vault_core::config::{
    AppAuthMethod, AuthenticationConfig, UserLookupConfig, UserLookupMode, VaultConfig,
};
use ldap2vault_core::network::message::BindRequest;
use ldap2vault_core::secret_store::{SecretStoreConnector, VaultConnector};
use ldap2vault_core::AuthError;

const APP_TOKEN: &str = "hvs.app-token";

fn vault_config(server: &MockServer) -> VaultConfig {
    VaultConfig {
        address: server.uri(),
        token: None,
        namespace: None,
        request_timeout_ms: 2_000,
        verify_tls: true,
    }
}

fn envelope(data: Value) -> Value {
    json!({
        "request_id": "8f2c1d1e-0000-0000-0000-000000000000",
        "lease_id": "",
        "lease_duration": 0,
        "renewable": false,
        "data": data,
        "warnings": null,
        "wrap_info": null,
        "auth": null
    })
}

fn login_response(token: &str) -> Value {
    json!({
        "request_id": "5b0a7c3e-0000-0000-0000-000000000000",
        "lease_id": "",
        "lease_duration": 0,
        "renewable": false,
        "data": null,
        "warnings": null,
        "wrap_info": null,
        "auth": {
            "client_token": token,
            "accessor": "accessor-1",
            "policies": ["default", "ldap-bridge"],
            "token_policies": ["default", "ldap-bridge"],
            "metadata": {"role_name": "billing"},
            "lease_duration": 3600,
            "renewable": true,
            "entity_id": "entity-1",
            "token_type": "service",
            "orphan": true
        }
    })
}

fn kv2_response(data: Value) -> Value {
    envelope(json!({
        "data": data,
        "metadata": {
            "created_time": "2024-01-01T00:00:00.000000Z",
            "custom_metadata": null,
            "deletion_time": "",
            "destroyed": false,
            "version": 1
        }
    }))
}

async fn mount_approle_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .and(body_json(json!({"role_id": "billing", "secret_id": "app-secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_response(APP_TOKEN)))
        .mount(server)
        .await;
}

/// AppRole login returns the client token from the auth block.
#[tokio::test]
async fn test_approle_login_issues_token() {
    let server = MockServer::start().await;
    mount_approle_login(&server).await;

    let connector = VaultConnector::new(
        vault_config(&server),
        AuthenticationConfig::default(),
        UserLookupConfig::default(),
    );
    let store = connector.connect().unwrap();

    let token = store
        .authenticate_application("billing", "app-secret")
        .await
        .unwrap();
    assert_eq!(token.expose(), APP_TOKEN);
}

/// A 4xx login answer is a rejection carrying Vault's message.
#[tokio::test]
async fn test_rejected_login_keeps_vault_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"errors": ["invalid role or secret ID"]})),
        )
        .mount(&server)
        .await;

    let connector = VaultConnector::new(
        vault_config(&server),
        AuthenticationConfig::default(),
        UserLookupConfig::default(),
    );
    let store = connector.connect().unwrap();

    let err = store
        .authenticate_application("billing", "nope")
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::Rejected("invalid role or secret ID".to_string()));
}

/// A sealed or failing Vault is a backend error, not a rejection.
#[tokio::test]
async fn test_server_failure_is_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({"errors": ["Vault is sealed"]})),
        )
        .mount(&server)
        .await;

    let connector = VaultConnector::new(
        vault_config(&server),
        AuthenticationConfig::default(),
        UserLookupConfig::default(),
    );
    let store = connector.connect().unwrap();

    let err = store
        .authenticate_application("billing", "app-secret")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Backend(ref msg) if msg.contains("sealed")));
}

/// Userpass login posts the password to the per-user login path.
#[tokio::test]
async fn test_userpass_login_uses_custom_mount() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/apps/login/billing"))
        .and(body_json(json!({"password": "app-secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_response("hvs.userpass")))
        .mount(&server)
        .await;

    let connector = VaultConnector::new(
        vault_config(&server),
        AuthenticationConfig {
            authenticate_apps: true,
            app_method: AppAuthMethod::Userpass,
            app_mount: Some("apps".to_string()),
        },
        UserLookupConfig::default(),
    );
    let store = connector.connect().unwrap();

    let token = store
        .authenticate_application("billing", "app-secret")
        .await
        .unwrap();
    assert_eq!(token.expose(), "hvs.userpass");
}

/// KV v1 record reads compare the password field and send the app token.
#[tokio::test]
async fn test_kv1_user_lookup_with_application_token() {
    let server = MockServer::start().await;
    mount_approle_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/users/alice"))
        .and(header("X-Vault-Token", APP_TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "password": "alice-pw",
            "email": "alice@example.com"
        }))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/users/mallory"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
        .mount(&server)
        .await;

    let connector = VaultConnector::new(
        vault_config(&server),
        AuthenticationConfig::default(),
        UserLookupConfig::default(),
    );
    let mut store = connector.connect().unwrap();
    let token = store
        .authenticate_application("billing", "app-secret")
        .await
        .unwrap();
    store.set_token(&token);

    assert!(store.authenticate_user("alice", "alice-pw").await.unwrap());
    assert!(!store.authenticate_user("alice", "guess").await.unwrap());
    assert!(!store.authenticate_user("mallory", "anything").await.unwrap());
}

/// KV v2 reads go through the data/ prefix and use the nested data map.
#[tokio::test]
async fn test_kv2_hierarchical_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/data/people/com/example/eng/bob"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(kv2_response(json!({"secret": "bob-pw"}))),
        )
        .mount(&server)
        .await;

    let connector = VaultConnector::new(
        VaultConfig {
            token: Some("root-token".to_string()),
            ..vault_config(&server)
        },
        AuthenticationConfig::default(),
        UserLookupConfig {
            lookup: UserLookupMode::Hierarchical,
            kv_mount: "kv".to_string(),
            kv_version: 2,
            users_path: "people".to_string(),
            password_field: "secret".to_string(),
        },
    );
    let store = connector.connect().unwrap();

    assert!(store
        .authenticate_user("com/example/eng/bob", "bob-pw")
        .await
        .unwrap());
}

/// A non-string password field never matches.
#[tokio::test]
async fn test_non_string_password_field_is_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/users/carol"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"password": 1234}))))
        .mount(&server)
        .await;

    let connector = VaultConnector::new(
        vault_config(&server),
        AuthenticationConfig::default(),
        UserLookupConfig::default(),
    );
    let store = connector.connect().unwrap();

    assert!(!store.authenticate_user("carol", "1234").await.unwrap());
}

/// Full two-phase bind through the bridge with the Vault adapter.
#[tokio::test]
async fn test_bridge_binds_against_vault() {
    let server = MockServer::start().await;
    mount_approle_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/users/alice"))
        .and(header("X-Vault-Token", APP_TOKEN))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope(json!({"password": "alice-pw"}))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let connector = VaultConnector::new(
        vault_config(&server),
        AuthenticationConfig::default(),
        UserLookupConfig::default(),
    );
    let bridge = AuthenticationBridge::new(Arc::new(connector), true, UserLookupMode::Flat);
    let mut session = bridge
        .connect("127.0.0.1:40000".parse().unwrap(), "conn-1".to_string())
        .unwrap();

    let mut request = BindRequest::simple("cn=billing,ou=apps,dc=example,dc=com", "app-secret");
    let outcome = bridge.bind(Some(&mut session), &mut request).await;
    assert!(outcome.is_success());
    assert!(!request.has_password());

    let mut request = BindRequest::simple("uid=alice,ou=people,dc=example,dc=com", "alice-pw");
    let outcome = bridge.bind(Some(&mut session), &mut request).await;
    assert!(outcome.is_success());

    // A malformed DN never reaches Vault.
    let mut request = BindRequest::simple("alice", "alice-pw");
    let outcome = bridge.bind(Some(&mut session), &mut request).await;
    assert_eq!(outcome.status, BindStatus::InvalidDnSyntax);
}

/// Lookup keys that would escape the users path never reach Vault.
#[tokio::test]
async fn test_traversal_keys_are_not_looked_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope(json!({"password": "pw"}))),
        )
        .mount(&server)
        .await;

    let connector = VaultConnector::new(
        vault_config(&server),
        AuthenticationConfig::default(),
        UserLookupConfig::default(),
    );
    let store = connector.connect().unwrap();

    for key in ["..", "../admin", "com/../../sys/config", "alice?list=true"] {
        assert!(!store.authenticate_user(key, "pw").await.unwrap(), "{key}");
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}
