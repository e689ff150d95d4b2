//! プッシュ先レジストリの解決

use crate::error::BuildResult;
use shipflow_core::{ImageDefinition, ImageName};

/// レジストリ未指定時に認証情報の検索に使うホスト
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// 解決済みのプッシュ先レジストリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryTarget {
    /// 明示的な指定（CLI・イメージ設定・グローバル設定）
    Explicit(String),
    /// イメージ名に含まれるレジストリ
    Embedded(String),
    /// 指定なし（デーモンの既定レジストリ）
    DaemonDefault,
}

impl RegistryTarget {
    /// 修飾に使うレジストリ文字列（`ghcr.io/org` のような名前空間付きも含む）
    pub fn registry(&self) -> Option<&str> {
        match self {
            Self::Explicit(registry) | Self::Embedded(registry) => Some(registry),
            Self::DaemonDefault => None,
        }
    }

    /// 認証情報の検索に使うホスト名
    ///
    /// - `ghcr.io/org` -> `ghcr.io`
    /// - 指定なし -> `docker.io`
    pub fn auth_host(&self) -> &str {
        match self.registry() {
            Some(registry) => registry.split('/').next().unwrap_or(registry),
            None => DEFAULT_REGISTRY,
        }
    }
}

impl std::fmt::Display for RegistryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit(registry) => write!(f, "{} (explicit)", registry),
            Self::Embedded(registry) => write!(f, "{} (from image name)", registry),
            Self::DaemonDefault => f.write_str("daemon default"),
        }
    }
}

/// イメージのプッシュ先レジストリを解決
///
/// # Priority
/// 1. 明示的な指定 `explicit`
/// 2. イメージ名に含まれるレジストリ
/// 3. 指定なし（デーモンの既定）
///
/// イメージ名は書き換えません。名前がパースできない場合のみエラーになります。
pub fn resolve_registry(image_name: &str, explicit: Option<&str>) -> BuildResult<RegistryTarget> {
    let parsed = ImageName::parse(image_name)?;

    if let Some(registry) = explicit.map(str::trim).filter(|r| !r.is_empty()) {
        return Ok(RegistryTarget::Explicit(
            registry.trim_end_matches('/').to_string(),
        ));
    }

    Ok(match parsed.registry() {
        Some(registry) => RegistryTarget::Embedded(registry.to_string()),
        None => RegistryTarget::DaemonDefault,
    })
}

/// 設定上の明示レジストリを決定
///
/// # Priority
/// 1. プッシュ時の指定（CLI `--registry`）
/// 2. イメージのビルド設定の `registry`
/// 3. グローバル設定の `registry`
pub fn configured_registry<'a>(
    push_override: Option<&'a str>,
    image: &'a ImageDefinition,
    global: Option<&'a str>,
) -> Option<&'a str> {
    let present = |r: &&str| !r.trim().is_empty();
    push_override
        .filter(present)
        .or_else(|| {
            image
                .build
                .as_ref()
                .and_then(|b| b.registry.as_deref())
                .filter(present)
        })
        .or(global.filter(present))
}
