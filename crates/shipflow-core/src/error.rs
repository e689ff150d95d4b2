use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("無効なイメージ名 '{name}': {reason}")]
    InvalidImageName { name: String, reason: String },

    #[error("YAMLパースエラー: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("ファイル読み込みエラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("イメージが見つかりません: {0}")]
    ImageNotFound(String),
}

impl CoreError {
    pub(crate) fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        CoreError::InvalidImageName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
