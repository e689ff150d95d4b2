use shipflow_core::CoreError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 不正なイメージ名・設定（呼び出し側の誤り、リトライ不可）
    Validation,
    /// デーモンに到達できない・不正な応答（バックオフ付きでリトライ可）
    Access,
    /// ビルドコンテキストの作成失敗
    Archive,
    /// デーモンがビルドを拒否・失敗
    Build,
    /// プッシュ失敗
    Push,
    /// 認証情報の解決失敗
    Auth,
}

/// プッシュ失敗の原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailureKind {
    /// 認証エラー（リトライしても解決しない）
    Auth,
    /// ネットワーク起因の一時的なエラー
    Network,
    /// レジストリがマニフェスト等を拒否
    Rejected,
}

impl PushFailureKind {
    /// HTTP ステータスとメッセージから原因を判定
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        if matches!(status, Some(401) | Some(403)) {
            return Self::Auth;
        }

        let lower = message.to_lowercase();
        let auth_markers = [
            "unauthorized",
            "authentication required",
            "denied",
            "forbidden",
            "incorrect username or password",
        ];
        if auth_markers.iter().any(|m| lower.contains(m)) {
            return Self::Auth;
        }

        let network_markers = [
            "connection refused",
            "connection reset",
            "timed out",
            "timeout",
            "broken pipe",
            "no such host",
            "i/o timeout",
            "tls handshake",
            "eof",
        ];
        if matches!(status, Some(502) | Some(503) | Some(504))
            || network_markers.iter().any(|m| lower.contains(m))
        {
            return Self::Network;
        }

        Self::Rejected
    }
}

impl std::fmt::Display for PushFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::Network => "network",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid image name '{name}': {reason}")]
    InvalidImageName { name: String, reason: String },

    #[error("Invalid tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Failed to create build context for {image}: {message}")]
    Archive { image: String, message: String },

    #[error("Docker daemon access failed ({target}): {message}")]
    Access { target: String, message: String },

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Operation '{operation}' timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    #[error("Build failed for {image}: {message}")]
    BuildFailed { image: String, message: String },

    #[error("Push failed for {name} ({kind}): {message}")]
    PushFailed {
        name: String,
        kind: PushFailureKind,
        message: String,
    },

    #[error("Authentication failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("Authentication required for {registry} but no credentials were found")]
    AuthRequired { registry: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for BuildError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidImageName { name, reason } => {
                BuildError::InvalidImageName { name, reason }
            }
            other => BuildError::InvalidConfig(other.to_string()),
        }
    }
}

impl BuildError {
    /// bollard のエラーをデーモンアクセスエラーに変換
    pub(crate) fn access(target: impl Into<String>, err: bollard::errors::Error) -> Self {
        BuildError::Access {
            target: target.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn auth(registry: impl Into<String>, message: impl Into<String>) -> Self {
        BuildError::AuthFailed {
            registry: registry.into(),
            message: message.into(),
        }
    }

    /// エラーの分類
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::InvalidImageName { .. }
            | BuildError::InvalidTag { .. }
            | BuildError::InvalidConfig(_) => ErrorKind::Validation,
            BuildError::DockerfileNotFound(_)
            | BuildError::ContextNotFound(_)
            | BuildError::Archive { .. }
            | BuildError::Io(_) => ErrorKind::Archive,
            BuildError::Access { .. }
            | BuildError::DockerConnection(_)
            | BuildError::Timeout { .. } => ErrorKind::Access,
            BuildError::BuildFailed { .. } => ErrorKind::Build,
            BuildError::PushFailed { .. } => ErrorKind::Push,
            BuildError::AuthFailed { .. } | BuildError::AuthRequired { .. } => ErrorKind::Auth,
        }
    }

    /// 呼び出し側がリトライしてよいエラーか
    pub fn is_retryable(&self) -> bool {
        match self {
            BuildError::PushFailed { kind, .. } => *kind == PushFailureKind::Network,
            other => other.kind() == ErrorKind::Access,
        }
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::DockerfileNotFound(path) => {
                format!(
                    "Dockerfileが見つかりません: {}\n\
                     \n\
                     解決方法:\n\
                     1. Dockerfileのパスを確認してください\n\
                     2. shipflow.yamlで明示的にパスを指定してください:\n\
                        dockerfile: path/to/Dockerfile",
                    path.display()
                )
            }
            BuildError::BuildFailed { image, message } => {
                format!(
                    "{} のビルドに失敗しました:\n{}\n\
                     \n\
                     Dockerfileの内容を確認してください。",
                    image, message
                )
            }
            BuildError::ContextNotFound(path) => {
                format!(
                    "ビルドコンテキストが見つかりません: {}\n\
                     \n\
                     shipflow.yamlでcontextパスを確認してください。",
                    path.display()
                )
            }
            BuildError::PushFailed {
                name,
                kind: PushFailureKind::Auth,
                message,
            } => {
                format!(
                    "{} のプッシュが認証エラーで拒否されました: {}\n\
                     \n\
                     ヒント:\n  • docker login でログインしているか確認してください\n  • shipflow.yaml の auth 設定を確認してください",
                    name, message
                )
            }
            BuildError::AuthFailed { registry, message } => {
                format!(
                    "{} の認証情報を読み込めませんでした: {}\n\
                     \n\
                     設定された認証情報の形式（Base64、暗号化パスワード）を確認してください。",
                    registry, message
                )
            }
            BuildError::Access { .. } | BuildError::DockerConnection(_) => {
                format!(
                    "{}\n\nヒント:\n  • Dockerが起動しているか確認してください",
                    self
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
