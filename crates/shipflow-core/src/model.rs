//! イメージ定義と認証設定のデータモデル

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// イメージ定義
///
/// `build` が無いイメージは pull 専用として扱われ、ビルド・プッシュの対象外です。
///
/// YAML形式：
/// ```yaml
/// - name: acme/app:latest
///   alias: app
///   build:
///     context: .
///     tags: [v1, ~, v2]
///     cleanup: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageDefinition {
    /// イメージ名（`[registry/]repository[:tag]`）
    pub name: String,
    /// 短縮名（フィルタ指定などで使用）
    #[serde(default)]
    pub alias: Option<String>,
    /// ビルド設定
    #[serde(default)]
    pub build: Option<BuildSpec>,
}

impl ImageDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_build(mut self, build: BuildSpec) -> Self {
        self.build = Some(build);
        self
    }

    /// ビルド設定を持たない pull 専用イメージか
    pub fn is_pull_only(&self) -> bool {
        self.build.is_none()
    }

    /// ログ表示用の名前（エイリアスがあれば併記）
    pub fn description(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} ({})", self.name, alias),
            None => self.name.clone(),
        }
    }
}

/// ビルド設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// 追加で付与するタグ
    ///
    /// `~` や空文字列のエントリは無視されます。
    #[serde(default)]
    pub tags: Vec<Option<String>>,
    /// 再ビルド成功後に以前のイメージを削除する
    #[serde(default)]
    pub cleanup: bool,
    /// キャッシュ無効化フラグ
    #[serde(default)]
    pub no_cache: bool,
    /// ビルド引数
    #[serde(default)]
    pub args: HashMap<String, String>,
    /// ビルドコンテキストのパス（プロジェクトルートからの相対パス）
    /// 未指定の場合はプロジェクトルート
    #[serde(default)]
    pub context: Option<PathBuf>,
    /// Dockerfileのパス（プロジェクトルートからの相対パス）
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,
    /// イメージ固有のプッシュ先レジストリ
    #[serde(default)]
    pub registry: Option<String>,
    /// マルチステージビルドのターゲット
    #[serde(default)]
    pub target: Option<String>,
}

impl BuildSpec {
    /// 有効なタグのみを元の順序で返す
    pub fn effective_tags(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .filter_map(|tag| tag.as_deref())
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
    }
}

/// 単一の認証エントリ
///
/// `auth` (Base64 の `username:password`)、`username`/`password`、
/// `identity_token` のいずれかで指定します。
/// `password` は `{aes-gcm}...` 形式で暗号化して記述できます。
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialEntry {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub identity_token: Option<String>,
}

// 秘密情報はログに出さない
impl std::fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("email", &self.email)
            .field("auth", &self.auth.as_ref().map(|_| "***"))
            .field("identity_token", &self.identity_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// 認証設定
///
/// 実行中は読み取り専用として扱います。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSettings {
    /// 方向を問わない既定の認証情報
    #[serde(default)]
    pub default: Option<CredentialEntry>,
    /// プッシュ時の既定の認証情報
    #[serde(default)]
    pub push: Option<CredentialEntry>,
    /// プル時の既定の認証情報
    #[serde(default)]
    pub pull: Option<CredentialEntry>,
    /// レジストリホスト -> 認証情報
    #[serde(default)]
    pub registries: HashMap<String, CredentialEntry>,
    /// Docker の config.json を参照するか
    #[serde(default = "default_true")]
    pub use_docker_config: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            default: None,
            push: None,
            pull: None,
            registries: HashMap::new(),
            use_docker_config: true,
        }
    }
}

fn default_true() -> bool {
    true
}
