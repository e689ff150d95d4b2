//! イメージ名のパース
//!
//! `[registry/]repository[:tag][@digest]` 形式のイメージ参照を構造的に分解します。

use crate::error::{CoreError, Result};
use std::fmt;
use std::str::FromStr;

/// タグ未指定時に使われるタグ
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LENGTH: usize = 128;

/// パース済みのイメージ参照
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageName {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageName {
    /// イメージ名をパース
    ///
    /// # Examples
    /// - `nginx` -> repository=`nginx`
    /// - `ghcr.io/org/app:v1.0` -> registry=`ghcr.io`, repository=`org/app`, tag=`v1.0`
    /// - `localhost:5000/app` -> registry=`localhost:5000`, repository=`app`
    /// - `app@sha256:...` -> digest 付き
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(CoreError::invalid_name(name, "empty image name"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(CoreError::invalid_name(name, "contains whitespace"));
        }

        let (rest, digest) = match name.split_once('@') {
            Some((rest, digest)) => {
                validate_digest(name, digest)?;
                (rest, Some(digest.to_string()))
            }
            None => (name, None),
        };

        // 最後の : 以降に / が無ければタグ（あればレジストリのポート番号）
        let (rest, tag) = match rest.rfind(':') {
            Some(pos) if !rest[pos + 1..].contains('/') => {
                let tag = &rest[pos + 1..];
                validate_tag(name, tag)?;
                (&rest[..pos], Some(tag.to_string()))
            }
            _ => (rest, None),
        };

        let (registry, repository) = match rest.split_once('/') {
            Some((first, remainder)) if is_registry_host(first) => {
                validate_registry(name, first)?;
                (Some(first.to_string()), remainder)
            }
            _ => (None, rest),
        };

        validate_repository(name, repository)?;

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// イメージ名のタグを差し替えた参照を作成
    ///
    /// タグのファンアウト（`name:tag` の組み立て）に使います。
    pub fn with_tag(name: &str, tag: &str) -> Result<Self> {
        let mut parsed = Self::parse(name)?;
        validate_tag(name, tag)?;
        parsed.tag = Some(tag.to_string());
        parsed.digest = None;
        Ok(parsed)
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// タグが無い場合は `latest`
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// タグ・ダイジェストを除いた名前（レジストリ込み）
    pub fn name_without_tag(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    /// 完全なイメージ名
    ///
    /// ダイジェストがあれば `name@digest`、無ければ `name:tag`（既定は latest）
    pub fn full_name(&self) -> String {
        match &self.digest {
            Some(digest) => format!("{}@{}", self.name_without_tag(), digest),
            None => format!("{}:{}", self.name_without_tag(), self.tag_or_default()),
        }
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

impl FromStr for ImageName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// レジストリの判定:
/// - `.` を含む（例: ghcr.io, *.amazonaws.com）
/// - `:` を含む（例: localhost:5000）
/// - `localhost`
fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn validate_registry(name: &str, registry: &str) -> Result<()> {
    let (host, port) = match registry.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };

    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(CoreError::invalid_name(
            name,
            format!("invalid registry host '{}'", registry),
        ));
    }

    if let Some(port) = port
        && (port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(CoreError::invalid_name(
            name,
            format!("invalid registry port in '{}'", registry),
        ));
    }

    Ok(())
}

/// リポジトリのパスコンポーネント
///
/// 小文字英数字を `.` `_` `__` `-`（連続可）で区切った形式
fn validate_repository(name: &str, repository: &str) -> Result<()> {
    if repository.is_empty() {
        return Err(CoreError::invalid_name(name, "missing repository"));
    }

    for component in repository.split('/') {
        if !is_valid_path_component(component) {
            return Err(CoreError::invalid_name(
                name,
                format!("invalid repository component '{}'", component),
            ));
        }
    }

    Ok(())
}

fn is_valid_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last)) if is_alnum(first) && is_alnum(last) => {}
        _ => return false,
    }

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if is_alnum(b) {
            i += 1;
            continue;
        }
        // 区切り文字: "." / "_" / "__" / "-"+
        let start = i;
        match b {
            b'.' => i += 1,
            b'_' => {
                i += 1;
                if bytes.get(i) == Some(&b'_') {
                    i += 1;
                }
            }
            b'-' => {
                while bytes.get(i) == Some(&b'-') {
                    i += 1;
                }
            }
            _ => return false,
        }
        if i == start || !bytes.get(i).copied().is_some_and(is_alnum) {
            return false;
        }
    }

    true
}

/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
fn validate_tag(name: &str, tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(CoreError::invalid_name(name, "empty tag"));
    }

    if tag.len() > MAX_TAG_LENGTH {
        return Err(CoreError::invalid_name(
            name,
            format!(
                "tag too long ({} characters, max {})",
                tag.len(),
                MAX_TAG_LENGTH
            ),
        ));
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(CoreError::invalid_name(
            name,
            format!("tag '{}' must not start with '.' or '-'", tag),
        ));
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(CoreError::invalid_name(
            name,
            format!("invalid character '{}' in tag '{}'", c, tag),
        ));
    }

    Ok(())
}

fn validate_digest(name: &str, digest: &str) -> Result<()> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err(CoreError::invalid_name(
            name,
            format!("digest '{}' is not of the form algorithm:hex", digest),
        ));
    };

    let algorithm_ok = !algorithm.is_empty()
        && algorithm
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '_' | '-'));
    let hex_ok = hex.len() >= 32 && hex.chars().all(|c| c.is_ascii_hexdigit());

    if !algorithm_ok || !hex_ok {
        return Err(CoreError::invalid_name(
            name,
            format!("invalid digest '{}'", digest),
        ));
    }

    Ok(())
}

/// タグとして有効かどうか
pub fn is_valid_tag(tag: &str) -> bool {
    validate_tag(tag, tag).is_ok()
}
