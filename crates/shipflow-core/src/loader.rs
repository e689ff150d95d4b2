//! プロジェクトファイルのローダー
//!
//! shipflow.yaml を読み込み、イメージ定義を検証します。

use crate::error::{CoreError, Result};
use crate::model::{AuthSettings, ImageDefinition};
use crate::name::ImageName;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// 解決済みのプロジェクト設定
///
/// 読み込み後は読み取り専用として扱います。
#[derive(Debug, Clone)]
pub struct Project {
    /// プロジェクトルート（設定ファイルのあるディレクトリ）
    pub root: PathBuf,
    /// グローバルなプッシュ先レジストリ
    pub registry: Option<String>,
    /// 認証設定
    pub auth: AuthSettings,
    /// イメージ定義（記述順）
    pub images: Vec<ImageDefinition>,
}

#[derive(Debug, Deserialize)]
struct ProjectFile {
    #[serde(default)]
    registry: Option<String>,
    #[serde(default)]
    auth: AuthSettings,
    #[serde(default)]
    images: Vec<ImageDefinition>,
}

/// 設定ファイルを読み込んでプロジェクトを生成
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_project_file(path: &Path) -> Result<Project> {
    info!("Loading project file");
    let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    parse_project(&content, root)
}

/// YAML文字列からプロジェクトを生成
pub fn parse_project(content: &str, root: PathBuf) -> Result<Project> {
    let file: ProjectFile = serde_yaml::from_str(content)?;

    validate_images(&file.images)?;

    info!(images = file.images.len(), "Project loaded successfully");

    Ok(Project {
        root,
        registry: file.registry.filter(|r| !r.trim().is_empty()),
        auth: file.auth,
        images: file.images,
    })
}

/// イメージ名のパースと、名前・エイリアスの重複を検証
fn validate_images(images: &[ImageDefinition]) -> Result<()> {
    let mut seen = HashSet::new();

    for image in images {
        ImageName::parse(&image.name)?;

        if !seen.insert(image.name.as_str()) {
            return Err(CoreError::InvalidConfig(format!(
                "イメージ名 '{}' が重複しています",
                image.name
            )));
        }

        if let Some(alias) = &image.alias
            && !seen.insert(alias.as_str())
        {
            return Err(CoreError::InvalidConfig(format!(
                "エイリアス '{}' が重複しています",
                alias
            )));
        }

        debug!(image = %image.name, pull_only = image.is_pull_only(), "Image definition validated");
    }

    Ok(())
}

impl Project {
    /// 対象イメージを選択
    ///
    /// `filter` はカンマ区切りのイメージ名またはエイリアス。
    /// 未指定の場合はすべてのイメージを記述順で返します。
    pub fn select(&self, filter: Option<&str>) -> Result<Vec<ImageDefinition>> {
        let Some(filter) = filter else {
            return Ok(self.images.clone());
        };

        let wanted: Vec<&str> = filter
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if let Some(unknown) = wanted.iter().find(|w| {
            !self
                .images
                .iter()
                .any(|image| image.name == **w || image.alias.as_deref() == Some(**w))
        }) {
            return Err(CoreError::ImageNotFound(unknown.to_string()));
        }

        Ok(self
            .images
            .iter()
            .filter(|image| {
                wanted
                    .iter()
                    .any(|w| image.name == *w || image.alias.as_deref() == Some(*w))
            })
            .cloned()
            .collect())
    }
}
