// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{encode, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde_json::{json, Map, Value};
use tower::ServiceExt;

use crate::auth::session::SESSION_COOKIE_NAME;
use crate::auth::{CookieSessionStore, OAuthToken, OidcClient, OidcError, Session, SessionError, SessionStore};
use crate::auth_server::{AuthServer, AuthServerError};
use crate::config::{
    AppConfig, BackendSettings, CookieSettings, DatabaseType, LogFormat, OidcSettings,
};
use crate::credential::UserCredential;
use crate::edv::{CreatedVault, DataVaultConfiguration, EdvError, VaultClient};
use crate::kms::{CreateKeyStoreRequest, CreatedKey, KeyManager, KeyStore, KeyType, KmsError};
use crate::models::BootstrapData;
use crate::onboarding::Provisioner;
use crate::state::AppState;
use crate::storage::{KeyValueStore, MemStore, StorageError, StorageResult};
use crate::zcap::SECURITY_CONTEXT;

pub const AUTHZ_KMS_URL: &str = "https://authz-kms.test";
pub const OPS_KMS_URL: &str = "https://ops-kms.test";
pub const UI_URL: &str = "https://ui.test";

pub fn backends() -> BackendSettings {
    BackendSettings {
        authz_kms_url: AUTHZ_KMS_URL.into(),
        ops_kms_url: OPS_KMS_URL.into(),
        key_edv_url: "https://key-edv.test".into(),
        user_edv_url: "https://user-edv.test".into(),
        hub_auth_url: "https://hub-auth.test".into(),
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ui_url: UI_URL.into(),
        oidc: OidcSettings {
            provider_url: "https://idp.test".into(),
            client_id: "wallet".into(),
            client_secret: "s3cret".into(),
            callback_url: "https://wallet.test/oidc/callback".into(),
            scopes: vec!["openid".into()],
        },
        cookie: CookieSettings {
            auth_key: [7u8; 32],
            enc_key: [9u8; 32],
            max_age: Duration::from_secs(3600),
            secure: false,
        },
        backends: backends(),
        database: DatabaseType::Mem,
        data_dir: PathBuf::from("."),
        tls: None,
        dependency_max_retries: 1,
        log_format: LogFormat::Pretty,
    }
}

// ---------------------------------------------------------------------------
// Keys and tokens
// ---------------------------------------------------------------------------

/// Locally held Ed25519 key.
pub struct TestKey {
    pair: Ed25519KeyPair,
    pkcs8: Vec<u8>,
}

impl TestKey {
    pub fn generate() -> Self {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new())
            .unwrap()
            .as_ref()
            .to_vec();
        let pair = Ed25519KeyPair::from_pkcs8(&pkcs8).unwrap();
        Self { pair, pkcs8 }
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.pair.sign(data).as_ref().to_vec()
    }

    pub fn public_key(&self) -> &[u8] {
        self.pair.public_key().as_ref()
    }

    pub fn kid(&self) -> String {
        Base64UrlUnpadded::encode_string(&self.public_key()[..8])
    }
}

pub fn ed25519_jwk(key: &TestKey) -> Value {
    json!({
        "kty": "OKP",
        "crv": "Ed25519",
        "use": "sig",
        "alg": "EdDSA",
        "kid": key.kid(),
        "x": Base64UrlUnpadded::encode_string(key.public_key()),
    })
}

pub fn sign_id_token(key: &TestKey, claims: &Value) -> String {
    let mut header = Header::new(jsonwebtoken::Algorithm::EdDSA);
    header.kid = Some(key.kid());
    encode(&header, claims, &EncodingKey::from_ed_der(&key.pkcs8)).unwrap()
}

// ---------------------------------------------------------------------------
// Key manager
// ---------------------------------------------------------------------------

#[derive(Default)]
struct KmsLog {
    calls: Vec<String>,
    credentials: Vec<UserCredential>,
    key_store_requests: Vec<CreateKeyStoreRequest>,
    keys: HashMap<String, TestKey>,
    first_ed25519: Option<Vec<u8>>,
    fail_on: HashSet<String>,
    signs_left: Option<usize>,
    next_id: usize,
}

/// In-memory KMS. Ed25519 keys are real, so signatures verify.
#[derive(Default)]
pub struct MockKeyManager {
    log: Mutex<KmsLog>,
}

impl MockKeyManager {
    /// Fail every call with this label (`create_key:ED25519`, `sign`, ...).
    pub fn fail_on(&self, label: &str) {
        self.log.lock().unwrap().fail_on.insert(label.to_string());
    }

    /// Let `n` signatures succeed, then fail the rest.
    pub fn fail_sign_after(&self, n: usize) {
        self.log.lock().unwrap().signs_left = Some(n);
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().calls.clone()
    }

    pub fn credentials(&self) -> Vec<UserCredential> {
        self.log.lock().unwrap().credentials.clone()
    }

    pub fn key_store_requests(&self) -> Vec<CreateKeyStoreRequest> {
        self.log.lock().unwrap().key_store_requests.clone()
    }

    pub fn first_ed25519_public_key(&self) -> Option<Vec<u8>> {
        self.log.lock().unwrap().first_ed25519.clone()
    }

    fn record(&self, label: String, credential: &UserCredential) -> Result<usize, KmsError> {
        let mut log = self.log.lock().unwrap();
        log.calls.push(label.clone());
        log.credentials.push(credential.clone());
        if log.fail_on.contains(&label) {
            return Err(KmsError::Request(format!("{label} rejected")));
        }
        log.next_id += 1;
        Ok(log.next_id)
    }
}

#[async_trait]
impl KeyManager for MockKeyManager {
    async fn create_key_store(
        &self,
        kms_url: &str,
        request: &CreateKeyStoreRequest,
        credential: &UserCredential,
    ) -> Result<KeyStore, KmsError> {
        self.log
            .lock()
            .unwrap()
            .key_store_requests
            .push(request.clone());
        let id = self.record(format!("create_key_store:{kms_url}"), credential)?;
        Ok(KeyStore {
            url: format!("{kms_url}/v1/keystores/{id}"),
            id: id.to_string(),
        })
    }

    async fn create_key(
        &self,
        key_store_url: &str,
        key_type: KeyType,
        credential: &UserCredential,
    ) -> Result<CreatedKey, KmsError> {
        let id = self.record(format!("create_key:{key_type}"), credential)?;
        let key_url = format!("{key_store_url}/keys/{id}");

        let public_key = if key_type == KeyType::Ed25519 {
            let key = TestKey::generate();
            let public_key = key.public_key().to_vec();
            let mut log = self.log.lock().unwrap();
            log.first_ed25519.get_or_insert_with(|| public_key.clone());
            log.keys.insert(key_url.clone(), key);
            public_key
        } else {
            vec![id as u8; 32]
        };

        Ok(CreatedKey {
            key_url,
            key_id: id.to_string(),
            public_key,
        })
    }

    async fn create_did(
        &self,
        _key_store_url: &str,
        key_id: &str,
        credential: &UserCredential,
    ) -> Result<String, KmsError> {
        self.record("create_did".to_string(), credential)?;
        Ok(format!("did:test:{key_id}"))
    }

    async fn sign(
        &self,
        key_url: &str,
        data: &[u8],
        credential: &UserCredential,
    ) -> Result<Vec<u8>, KmsError> {
        self.record("sign".to_string(), credential)?;
        let mut log = self.log.lock().unwrap();
        if let Some(left) = log.signs_left.as_mut() {
            if *left == 0 {
                return Err(KmsError::Request("sign quota exhausted".into()));
            }
            *left -= 1;
        }
        let key = log
            .keys
            .get(key_url)
            .ok_or_else(|| KmsError::Request(format!("unknown key {key_url}")))?;
        Ok(key.sign(data))
    }
}

// ---------------------------------------------------------------------------
// Vault server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct VaultLog {
    configs: Vec<DataVaultConfiguration>,
    fail: bool,
    bad_capability: bool,
}

pub struct MockVaultClient {
    base_url: String,
    log: Mutex<VaultLog>,
}

impl MockVaultClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            log: Mutex::default(),
        }
    }

    pub fn fail(&self) {
        self.log.lock().unwrap().fail = true;
    }

    /// Answer with a body that is not a capability.
    pub fn return_bad_capability(&self) {
        self.log.lock().unwrap().bad_capability = true;
    }

    pub fn configs(&self) -> Vec<DataVaultConfiguration> {
        self.log.lock().unwrap().configs.clone()
    }
}

#[async_trait]
impl VaultClient for MockVaultClient {
    async fn create_data_vault(
        &self,
        config: &DataVaultConfiguration,
        _credential: &UserCredential,
    ) -> Result<CreatedVault, EdvError> {
        let mut log = self.log.lock().unwrap();
        log.configs.push(config.clone());
        if log.fail {
            return Err(EdvError::Request("vault creation rejected".into()));
        }

        let url = format!("{}/data-vaults/{}", self.base_url, log.configs.len());
        let capability = if log.bad_capability {
            b"not a capability".to_vec()
        } else {
            json!({
                "@context": SECURITY_CONTEXT,
                "id": format!("{url}/zcaps/root"),
                "invocationTarget": { "id": url, "type": "urn:edv:vault" },
                "controller": config.controller,
                "allowedAction": ["read", "write"],
            })
            .to_string()
            .into_bytes()
        };
        Ok(CreatedVault { url, capability })
    }
}

// ---------------------------------------------------------------------------
// Authorization server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HubLog {
    secret: Option<(Vec<u8>, Vec<u8>)>,
    bootstrap: HashMap<String, BootstrapData>,
    fail_secret: bool,
    fail_post_bootstrap: bool,
    fail_get_bootstrap: bool,
}

#[derive(Default)]
pub struct MockAuthServer {
    log: Mutex<HubLog>,
}

impl MockAuthServer {
    pub fn fail_secret(&self) {
        self.log.lock().unwrap().fail_secret = true;
    }

    pub fn fail_post_bootstrap(&self) {
        self.log.lock().unwrap().fail_post_bootstrap = true;
    }

    pub fn fail_get_bootstrap(&self) {
        self.log.lock().unwrap().fail_get_bootstrap = true;
    }

    pub fn set_bootstrap(&self, sub: &str, data: BootstrapData) {
        self.log
            .lock()
            .unwrap()
            .bootstrap
            .insert(sub.to_string(), data);
    }

    pub fn bootstrap_for(&self, sub: &str) -> Option<BootstrapData> {
        self.log.lock().unwrap().bootstrap.get(sub).cloned()
    }

    /// Last `(payload, signature)` pair received.
    pub fn secret_share(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.log.lock().unwrap().secret.clone()
    }
}

#[async_trait]
impl AuthServer for MockAuthServer {
    async fn post_secret_share(
        &self,
        payload: &[u8],
        signature: &[u8],
        _credential: &UserCredential,
    ) -> Result<(), AuthServerError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_secret {
            return Err(AuthServerError::Request("secret share rejected".into()));
        }
        log.secret = Some((payload.to_vec(), signature.to_vec()));
        Ok(())
    }

    async fn post_bootstrap_data(
        &self,
        credential: &UserCredential,
        data: &BootstrapData,
    ) -> Result<(), AuthServerError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_post_bootstrap {
            return Err(AuthServerError::Request("bootstrap update rejected".into()));
        }
        log.bootstrap.insert(credential.sub.clone(), data.clone());
        Ok(())
    }

    async fn get_bootstrap_data(
        &self,
        credential: &UserCredential,
    ) -> Result<BootstrapData, AuthServerError> {
        let log = self.log.lock().unwrap();
        if log.fail_get_bootstrap {
            return Err(AuthServerError::Request("bootstrap lookup rejected".into()));
        }
        log.bootstrap
            .get(&credential.sub)
            .cloned()
            .ok_or_else(|| AuthServerError::Request("404 Not Found".into()))
    }
}

// ---------------------------------------------------------------------------
// Identity provider
// ---------------------------------------------------------------------------

/// Identity provider that accepts any code and echoes the expected nonce.
pub struct MockOidcClient {
    subject: Mutex<String>,
    pub fail_exchange: AtomicBool,
    pub omit_id_token: AtomicBool,
    pub fail_verify: AtomicBool,
    pub omit_sub: AtomicBool,
    pub fail_user_info: AtomicBool,
    pub scalar_user_info: AtomicBool,
    nonces: Mutex<Vec<String>>,
}

impl Default for MockOidcClient {
    fn default() -> Self {
        Self {
            subject: Mutex::new("alice".into()),
            fail_exchange: AtomicBool::new(false),
            omit_id_token: AtomicBool::new(false),
            fail_verify: AtomicBool::new(false),
            omit_sub: AtomicBool::new(false),
            fail_user_info: AtomicBool::new(false),
            scalar_user_info: AtomicBool::new(false),
            nonces: Mutex::default(),
        }
    }
}

impl MockOidcClient {
    pub fn set_subject(&self, sub: &str) {
        *self.subject.lock().unwrap() = sub.to_string();
    }

    /// Nonces passed to `verify_id_token`, in call order.
    pub fn nonces(&self) -> Vec<String> {
        self.nonces.lock().unwrap().clone()
    }
}

#[async_trait]
impl OidcClient for MockOidcClient {
    fn auth_code_url(&self, state: &str, nonce: &str) -> String {
        format!("https://idp.test/authorize?client_id=wallet&state={state}&nonce={nonce}")
    }

    async fn exchange(&self, code: &str) -> Result<OAuthToken, OidcError> {
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(OidcError::Exchange("invalid_grant".into()));
        }
        let id_token = (!self.omit_id_token.load(Ordering::SeqCst)).then(|| format!("id-{code}"));
        Ok(OAuthToken {
            access_token: format!("at-{code}"),
            refresh_token: Some(format!("rt-{code}")),
            token_type: Some("Bearer".into()),
            id_token,
        })
    }

    async fn verify_id_token(
        &self,
        _raw_token: &str,
        nonce: &str,
    ) -> Result<Map<String, Value>, OidcError> {
        self.nonces.lock().unwrap().push(nonce.to_string());
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(OidcError::Verification("InvalidSignature".into()));
        }

        let sub = self.subject.lock().unwrap().clone();
        let mut claims = Map::new();
        claims.insert("iss".into(), json!("https://idp.test"));
        claims.insert("aud".into(), json!("wallet"));
        claims.insert("exp".into(), json!(chrono::Utc::now().timestamp() + 300));
        claims.insert("email".into(), json!(format!("{sub}@example.com")));
        claims.insert("nonce".into(), json!(nonce));
        if !self.omit_sub.load(Ordering::SeqCst) {
            claims.insert("sub".into(), json!(sub));
        }
        Ok(claims)
    }

    async fn user_info(&self, access_token: &str) -> Result<Value, OidcError> {
        if self.fail_user_info.load(Ordering::SeqCst) {
            return Err(OidcError::UserInfo("GET userinfo returned 401".into()));
        }
        if self.scalar_user_info.load(Ordering::SeqCst) {
            return Ok(json!("unexpected"));
        }
        Ok(json!({
            "sub": "provider-side-id",
            "name": "Alice",
            "email": "alice@example.com",
            "token_seen": access_token,
        }))
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Cookie sessions whose open or save can be made to fail.
pub struct FailingSessionStore {
    inner: CookieSessionStore,
    pub fail_open: AtomicBool,
    pub fail_save: AtomicBool,
}

impl FailingSessionStore {
    pub fn new(settings: &CookieSettings) -> Self {
        Self {
            inner: CookieSessionStore::new(settings),
            fail_open: AtomicBool::new(false),
            fail_save: AtomicBool::new(false),
        }
    }
}

impl SessionStore for FailingSessionStore {
    fn open(&self, jar: &CookieJar) -> Result<Session, SessionError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SessionError::Unavailable("open disabled".into()));
        }
        self.inner.open(jar)
    }

    fn save(&self, session: &Session) -> Result<Cookie<'static>, SessionError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(SessionError::Unavailable("save disabled".into()));
        }
        self.inner.save(session)
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// In-memory store whose reads or writes can be made to fail, and which can
/// simulate a concurrent writer.
#[derive(Default)]
pub struct FailingStore {
    inner: MemStore,
    pub fail_get: AtomicBool,
    pub fail_write: AtomicBool,
    racer: Mutex<Option<(String, String, Vec<u8>)>>,
}

impl FailingStore {
    /// Commit `value` under `namespace/key` just before the next
    /// `insert_new` of that key, as if another login had won the race.
    pub fn race_next_insert(&self, namespace: &str, key: &str, value: Vec<u8>) {
        *self.racer.lock().unwrap() = Some((namespace.to_string(), key.to_string(), value));
    }

    fn check_write(&self) -> StorageResult<()> {
        if self.fail_write.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("write disabled".into()));
        }
        Ok(())
    }
}

impl KeyValueStore for FailingStore {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Vec<u8>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("read disabled".into()));
        }
        self.inner.get(namespace, key)
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        self.check_write()?;
        self.inner.put(namespace, key, value)
    }

    fn insert_new(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        self.check_write()?;
        let racer = {
            let mut racer = self.racer.lock().unwrap();
            let due = matches!(racer.as_ref(), Some((ns, k, _)) if ns == namespace && k == key);
            if due {
                racer.take()
            } else {
                None
            }
        };
        if let Some((ns, k, winner)) = racer {
            self.inner.put(&ns, &k, &winner)?;
        }
        self.inner.insert_new(namespace, key, value)
    }
}

// ---------------------------------------------------------------------------
// Application harness
// ---------------------------------------------------------------------------

/// Router wired to in-memory collaborators.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub oidc: Arc<MockOidcClient>,
    pub sessions: Arc<FailingSessionStore>,
    pub store: Arc<FailingStore>,
    pub kms: Arc<MockKeyManager>,
    pub key_edv: Arc<MockVaultClient>,
    pub user_edv: Arc<MockVaultClient>,
    pub hub: Arc<MockAuthServer>,
}

impl TestApp {
    pub fn new() -> Self {
        let config = test_config();
        let oidc = Arc::new(MockOidcClient::default());
        let sessions = Arc::new(FailingSessionStore::new(&config.cookie));
        let store = Arc::new(FailingStore::default());
        let kms = Arc::new(MockKeyManager::default());
        let key_edv = Arc::new(MockVaultClient::new("https://key-edv.test"));
        let user_edv = Arc::new(MockVaultClient::new("https://user-edv.test"));
        let hub = Arc::new(MockAuthServer::default());

        let provisioner = Provisioner::new(
            config.backends.clone(),
            kms.clone(),
            key_edv.clone(),
            user_edv.clone(),
            hub.clone(),
        );
        let state = AppState {
            config: Arc::new(config),
            sessions: sessions.clone(),
            oidc: oidc.clone(),
            store: store.clone() as Arc<dyn KeyValueStore>,
            provisioner: Arc::new(provisioner),
            auth_server: hub.clone(),
        };

        Self {
            router: crate::api::router(state.clone()),
            state,
            oidc,
            sessions,
            store,
            kms,
            key_edv,
            user_edv,
            hub,
        }
    }

    /// GET `uri`, optionally sending a `name=value` cookie.
    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut request = Request::builder().method("GET").uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.router
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Seal `session` into a request cookie header value.
    pub fn cookie_for(&self, session: &Session) -> String {
        let cookie = self.sessions.save(session).unwrap();
        format!("{}={}", cookie.name(), cookie.value())
    }

    /// Open the session carried by a `name=value` cookie.
    pub fn open_cookie(&self, cookie: &str) -> Session {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::COOKIE, cookie.parse().unwrap());
        self.sessions
            .open(&CookieJar::from_headers(&headers))
            .unwrap()
    }
}

/// `name=value` of the session cookie set by a response.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| Cookie::parse(v.to_string()).ok())
        .find(|c| c.name() == SESSION_COOKIE_NAME)
        .map(|c| format!("{}={}", c.name(), c.value()))
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
