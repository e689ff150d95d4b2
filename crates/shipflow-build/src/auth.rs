//! レジストリ認証処理
//!
//! shipflow.yaml の認証設定と Docker config.json から認証情報を解決し、
//! Bollard の DockerCredentials に変換します。
//!
//! 検索順序:
//! 1. レジストリ固有のエントリ（`auth.registries`）
//! 2. 方向別の既定（`auth.push` / `auth.pull`）、次に `auth.default`
//! 3. Docker config.json（`auths` → credential helper）
//!
//! 設定済みの認証情報がデコード・復号できない場合はエラーにし、
//! 匿名アクセスへ黙って切り替えることはしません。

use crate::error::{BuildError, BuildResult};
use crate::registry::{DEFAULT_REGISTRY, RegistryTarget};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use bollard::auth::DockerCredentials;
use serde::Deserialize;
use shipflow_core::{AuthSettings, CredentialEntry};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;

/// 暗号化パスワードの接頭辞
const ENCRYPTED_PREFIX: &str = "{aes-gcm}";
/// 暗号化パスワードのマスターキーを渡す環境変数
pub const MASTER_KEY_ENV: &str = "SHIPFLOW_MASTER_KEY";
const MASTER_KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

/// Docker Hub の認証情報が config.json に保存されるキー
const DOCKER_HUB_KEYS: [&str; 3] = [
    "https://index.docker.io/v1/",
    "index.docker.io",
    "registry-1.docker.io",
];

/// 認証の方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthDirection {
    Push,
    Pull,
}

/// 解決済みの認証情報
///
/// 1回のプッシュ／プル操作の間だけ保持します。
#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub identity_token: Option<String>,
    /// 認証情報を適用するレジストリ
    pub registry: String,
}

impl AuthConfig {
    pub fn basic(
        username: impl Into<String>,
        password: impl Into<String>,
        registry: impl Into<String>,
    ) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            email: None,
            identity_token: None,
            registry: registry.into(),
        }
    }

    pub fn token(token: impl Into<String>, registry: impl Into<String>) -> Self {
        Self {
            username: None,
            password: None,
            email: None,
            identity_token: Some(token.into()),
            registry: registry.into(),
        }
    }

    /// Bollard の DockerCredentials に変換
    pub fn to_docker_credentials(&self) -> DockerCredentials {
        DockerCredentials {
            username: self.username.clone(),
            password: self.password.clone(),
            email: self.email.clone(),
            identitytoken: self.identity_token.clone(),
            serveraddress: Some(self.registry.clone()),
            ..Default::default()
        }
    }
}

// パスワード・トークンはログに出さない
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("email", &self.email)
            .field("identity_token", &self.identity_token.as_ref().map(|_| "***"))
            .field("registry", &self.registry)
            .finish()
    }
}

/// Docker config.json の構造
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    /// 認証情報 (レジストリ -> AuthEntry)
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    /// credential helper 名 (例: "osxkeychain", "desktop")
    #[serde(default)]
    creds_store: Option<String>,
    /// レジストリ別の credential helper
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

/// 認証エントリ
#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,
    identitytoken: Option<String>,
}

/// credential helper からのレスポンス
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

type CacheKey = (String, AuthDirection);

/// 認証情報リゾルバ
///
/// 設定は構築時に受け取り、以降は読み取り専用です。
/// 解決結果は (レジストリ, 方向) ごとにキャッシュし、並行プッシュ間で共有します。
pub struct CredentialResolver {
    settings: AuthSettings,
    docker_config_path: PathBuf,
    strict: bool,
    master_key: Option<[u8; MASTER_KEY_BYTES]>,
    cache: Mutex<HashMap<CacheKey, Option<AuthConfig>>>,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new(AuthSettings::default())
    }
}

impl CredentialResolver {
    /// 新しい CredentialResolver を作成
    ///
    /// Docker config.json は DOCKER_CONFIG または ~/.docker/config.json を使用
    pub fn new(settings: AuthSettings) -> Self {
        Self {
            settings,
            docker_config_path: shipflow_config::docker_config_path(),
            strict: false,
            master_key: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 指定したパスの config.json を使用
    pub fn with_docker_config_path(mut self, path: PathBuf) -> Self {
        self.docker_config_path = path;
        self
    }

    /// 認証情報が見つからない場合にエラーとする
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// 暗号化パスワードの復号に使うマスターキーを指定
    ///
    /// 未指定の場合は SHIPFLOW_MASTER_KEY 環境変数（Base64）を使用
    pub fn with_master_key(mut self, key: [u8; MASTER_KEY_BYTES]) -> Self {
        self.master_key = Some(key);
        self
    }

    /// イメージのプッシュ先に対する認証情報を解決
    ///
    /// # Returns
    /// * `Ok(Some(auth))` - 認証情報が見つかった場合
    /// * `Ok(None)` - 認証情報が設定されていない場合（匿名アクセス）
    /// * `Err(e)` - 設定された認証情報を読めない場合、または strict で見つからない場合
    pub fn resolve(
        &self,
        image: &str,
        target: &RegistryTarget,
        direction: AuthDirection,
    ) -> BuildResult<Option<AuthConfig>> {
        let host = target.auth_host().to_string();
        let key = (target.registry().unwrap_or(&host).to_string(), direction);

        if let Some(cached) = self.cache_get(&key) {
            tracing::debug!("Using cached credentials for {} ({:?})", host, direction);
            return self.finish(cached, &host);
        }

        tracing::debug!(
            "Resolving credentials for {} via {} ({:?})",
            image,
            target,
            direction
        );
        let resolved = self.lookup(target, &host, direction)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, resolved.clone());
        }

        self.finish(resolved, &host)
    }

    fn cache_get(&self, key: &CacheKey) -> Option<Option<AuthConfig>> {
        self.cache.lock().ok().and_then(|cache| cache.get(key).cloned())
    }

    fn finish(&self, resolved: Option<AuthConfig>, host: &str) -> BuildResult<Option<AuthConfig>> {
        match resolved {
            Some(auth) => Ok(Some(auth)),
            None if self.strict => Err(BuildError::AuthRequired {
                registry: host.to_string(),
            }),
            None => {
                tracing::debug!("No credentials found for {}, continuing anonymously", host);
                Ok(None)
            }
        }
    }

    fn lookup(
        &self,
        target: &RegistryTarget,
        host: &str,
        direction: AuthDirection,
    ) -> BuildResult<Option<AuthConfig>> {
        // 1. レジストリ固有のエントリ（名前空間付きの指定を優先）
        let specific = target
            .registry()
            .and_then(|registry| self.settings.registries.get(registry))
            .or_else(|| self.settings.registries.get(host));
        if let Some(entry) = specific {
            tracing::debug!("Found registry-specific credentials for {}", host);
            return self.entry_to_auth(entry, host).map(Some);
        }

        // 2. 方向別の既定、次に共通の既定
        let scoped = match direction {
            AuthDirection::Push => self.settings.push.as_ref(),
            AuthDirection::Pull => self.settings.pull.as_ref(),
        };
        if let Some(entry) = scoped.or(self.settings.default.as_ref()) {
            tracing::debug!("Using default {:?} credentials for {}", direction, host);
            return self.entry_to_auth(entry, host).map(Some);
        }

        // 3. Docker config.json
        if self.settings.use_docker_config {
            return self.from_docker_config(host);
        }

        Ok(None)
    }

    /// 設定エントリを AuthConfig に変換
    fn entry_to_auth(&self, entry: &CredentialEntry, registry: &str) -> BuildResult<AuthConfig> {
        if let Some(auth_b64) = &entry.auth {
            let mut auth = decode_basic_auth(auth_b64, registry)?;
            auth.email = entry.email.clone();
            return Ok(auth);
        }

        if let Some(token) = &entry.identity_token {
            return Ok(AuthConfig::token(token.clone(), registry));
        }

        match (&entry.username, &entry.password) {
            (Some(username), Some(password)) => {
                let password = self.decrypt_if_needed(password, registry)?;
                Ok(AuthConfig {
                    email: entry.email.clone(),
                    ..AuthConfig::basic(username.clone(), password, registry)
                })
            }
            (Some(_), None) => Err(BuildError::auth(registry, "username given without password")),
            _ => Err(BuildError::auth(
                registry,
                "credential entry has neither auth, identity_token nor username/password",
            )),
        }
    }

    /// `{aes-gcm}` 形式のパスワードを復号
    fn decrypt_if_needed(&self, password: &str, registry: &str) -> BuildResult<String> {
        let Some(encoded) = password.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(password.to_string());
        };

        let key = match self.master_key {
            Some(key) => key,
            None => load_master_key().map_err(|message| BuildError::auth(registry, message))?,
        };

        decrypt_password(encoded, &key).map_err(|message| BuildError::auth(registry, message))
    }

    /// Docker config.json から認証情報を取得
    fn from_docker_config(&self, host: &str) -> BuildResult<Option<AuthConfig>> {
        // config.json が存在しない場合は認証なしで続行
        if !self.docker_config_path.exists() {
            tracing::debug!("Docker config.json not found at {:?}", self.docker_config_path);
            return Ok(None);
        }

        let config = self.load_docker_config()?;
        let keys = candidate_keys(host);

        // 1. auths セクションを確認
        for key in &keys {
            let Some(entry) = config.auths.get(key) else {
                continue;
            };
            if let Some(auth_b64) = &entry.auth
                && !auth_b64.is_empty()
            {
                tracing::debug!("Found credentials in auths for {}", host);
                return decode_basic_auth(auth_b64, host).map(Some);
            }
            if let Some(token) = &entry.identitytoken {
                tracing::debug!("Found identity token in auths for {}", host);
                return Ok(Some(AuthConfig::token(token.clone(), host)));
            }
        }

        // 2. credential helper を確認（レジストリ別 → 共通）
        let helper = keys
            .iter()
            .find_map(|key| config.cred_helpers.get(key))
            .or(config.creds_store.as_ref());
        if let Some(helper) = helper {
            tracing::debug!("Trying credential helper: {}", helper);
            let server = if host == DEFAULT_REGISTRY {
                DOCKER_HUB_KEYS[0]
            } else {
                host
            };
            if let Some(auth) = self.get_from_helper(helper, server, host)? {
                return Ok(Some(auth));
            }
        }

        Ok(None)
    }

    /// Docker config.json を読み込み
    fn load_docker_config(&self) -> BuildResult<DockerConfig> {
        let registry = self.docker_config_path.display().to_string();
        let content = std::fs::read_to_string(&self.docker_config_path)
            .map_err(|e| BuildError::auth(&registry, format!("Failed to read config.json: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| BuildError::auth(&registry, format!("Failed to parse config.json: {}", e)))
    }

    /// credential helper から認証情報を取得
    fn get_from_helper(
        &self,
        helper: &str,
        server: &str,
        registry: &str,
    ) -> BuildResult<Option<AuthConfig>> {
        let helper_cmd = format!("docker-credential-{}", helper);

        let spawned = Command::new(&helper_cmd)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Credential helper {} is not installed", helper_cmd);
                return Ok(None);
            }
            Err(e) => {
                return Err(BuildError::auth(
                    registry,
                    format!("Failed to run {}: {}", helper_cmd, e),
                ));
            }
        };

        // レジストリ名を stdin に渡す
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(server.as_bytes())
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(BuildError::auth(
                registry,
                format!("Failed to write to {}: {}", helper_cmd, e),
            ));
        }

        let output = child
            .wait_with_output()
            .map_err(|e| BuildError::auth(registry, format!("Credential helper failed: {}", e)))?;

        if !output.status.success() {
            // credential helper が認証情報を持っていない場合は None を返す
            tracing::debug!(
                "Credential helper returned error for {}: {}",
                registry,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }

        let response: CredentialResponse = serde_json::from_slice(&output.stdout).map_err(|e| {
            BuildError::auth(
                registry,
                format!("Failed to parse credential helper response: {}", e),
            )
        })?;

        // Username が "<token>" の場合は Secret が identity token
        if response.username == "<token>" {
            return Ok(Some(AuthConfig::token(response.secret, registry)));
        }

        Ok(Some(AuthConfig::basic(
            response.username,
            response.secret,
            registry,
        )))
    }
}

/// config.json 上で検索するキー
fn candidate_keys(host: &str) -> Vec<String> {
    let mut keys = vec![
        host.to_string(),
        format!("https://{}", host),
        format!("https://{}/v1/", host),
    ];
    if host == DEFAULT_REGISTRY {
        keys.extend(DOCKER_HUB_KEYS.iter().map(|k| k.to_string()));
    }
    keys
}

/// Base64エンコードされた "username:password" をデコード
fn decode_basic_auth(auth_b64: &str, registry: &str) -> BuildResult<AuthConfig> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64.trim())
        .map_err(|e| BuildError::auth(registry, format!("Failed to decode auth: {}", e)))?;

    let auth_str = String::from_utf8(decoded)
        .map_err(|e| BuildError::auth(registry, format!("Invalid UTF-8 in auth: {}", e)))?;

    match auth_str.split_once(':') {
        Some((username, password)) if !username.is_empty() => {
            Ok(AuthConfig::basic(username, password, registry))
        }
        _ => Err(BuildError::auth(
            registry,
            "auth is not of the form username:password",
        )),
    }
}

fn load_master_key() -> Result<[u8; MASTER_KEY_BYTES], String> {
    let raw = std::env::var(MASTER_KEY_ENV)
        .map_err(|_| format!("encrypted password found but {} is not set", MASTER_KEY_ENV))?;
    decode_master_key(&raw)
}

/// Base64 のマスターキーをデコード
pub fn decode_master_key(raw: &str) -> Result<[u8; MASTER_KEY_BYTES], String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|_| "invalid master key encoding".to_string())?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("master key must be {} bytes", MASTER_KEY_BYTES))
}

/// 新しいマスターキーを生成（Base64）
pub fn generate_master_key() -> String {
    let key = Aes256Gcm::generate_key(&mut OsRng);
    base64::engine::general_purpose::STANDARD.encode(key)
}

fn decrypt_password(encoded: &str, key: &[u8; MASTER_KEY_BYTES]) -> Result<String, String> {
    let data = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| "invalid encrypted password encoding".to_string())?;

    if data.len() <= NONCE_BYTES {
        return Err("encrypted password is truncated".to_string());
    }

    let (nonce, ciphertext) = data.split_at(NONCE_BYTES);
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| "invalid master key".to_string())?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| "failed to decrypt password (wrong master key?)".to_string())?;

    String::from_utf8(plaintext).map_err(|_| "decrypted password is not UTF-8".to_string())
}

/// パスワードを `{aes-gcm}...` 形式に暗号化
pub fn encrypt_password(plaintext: &str, key: &[u8; MASTER_KEY_BYTES]) -> Result<String, String> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| "invalid master key".to_string())?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| "failed to encrypt password".to_string())?;

    let mut data = nonce.to_vec();
    data.extend_from_slice(&ciphertext);

    Ok(format!(
        "{}{}",
        ENCRYPTED_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(data)
    ))
}
