//! イメージプッシュ処理
//!
//! ビルドしたイメージを、追加タグごとにレジストリへプッシュします。

use crate::auth::{AuthDirection, CredentialResolver};
use crate::daemon::DaemonAccess;
use crate::error::{BuildError, BuildResult};
use crate::registry::{RegistryTarget, configured_registry, resolve_registry};
use shipflow_core::name::{DEFAULT_TAG, is_valid_tag};
use shipflow_core::{ImageDefinition, ImageName};
use std::sync::Arc;

/// プッシュ結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// ビルド設定が無いため対象外
    Skipped,
    Pushed {
        target: RegistryTarget,
        /// プッシュした参照（プッシュ順）
        names: Vec<String>,
    },
}

impl PushOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// プッシュのオーケストレーター
pub struct PushOrchestrator {
    daemon: Arc<dyn DaemonAccess>,
    credentials: Arc<CredentialResolver>,
    global_registry: Option<String>,
}

impl PushOrchestrator {
    pub fn new(daemon: Arc<dyn DaemonAccess>, credentials: Arc<CredentialResolver>) -> Self {
        Self {
            daemon,
            credentials,
            global_registry: None,
        }
    }

    /// グローバル設定のレジストリ
    pub fn with_global_registry(mut self, registry: Option<String>) -> Self {
        self.global_registry = registry.filter(|r| !r.trim().is_empty());
        self
    }

    /// イメージと追加タグをプッシュ
    ///
    /// 正規名を最初に、続いて `name:tag` を設定順にプッシュします。
    /// すべて同じプッシュ先・同じ認証情報を使い、最初の失敗で中断します。
    pub async fn push(
        &self,
        image: &ImageDefinition,
        registry_override: Option<&str>,
    ) -> BuildResult<PushOutcome> {
        let Some(spec) = image.build.as_ref() else {
            tracing::debug!("{} has no build configuration, skipping push", image.name);
            return Ok(PushOutcome::Skipped);
        };

        let configured = configured_registry(
            registry_override,
            image,
            self.global_registry.as_deref(),
        );
        let target = resolve_registry(&image.name, configured)?;

        // プッシュ前に全タグを検証
        let mut names = vec![canonical_name(&image.name)?];
        for tag in spec.effective_tags() {
            if !is_valid_tag(tag) {
                return Err(BuildError::InvalidTag {
                    tag: tag.to_string(),
                    reason: "tags may contain [A-Za-z0-9_.-], must not start with '.' or '-', max 128 characters"
                        .to_string(),
                });
            }
            names.push(ImageName::with_tag(&image.name, tag)?.full_name());
        }

        let auth = self
            .credentials
            .resolve(&image.name, &target, AuthDirection::Push)?;
        if auth.is_none() {
            tracing::debug!("No credentials for {}, pushing anonymously", target.auth_host());
        }

        tracing::info!("Pushing {} to {}", image.description(), target);

        for name in &names {
            self.daemon.push_image(name, auth.as_ref(), &target).await?;
            tracing::info!("Pushed {}", name);
        }

        Ok(PushOutcome::Pushed { target, names })
    }
}

/// 正規名（既定タグ `latest` は省略して表記）
fn canonical_name(name: &str) -> BuildResult<String> {
    let parsed = ImageName::parse(name)?;
    Ok(match (parsed.tag(), parsed.digest()) {
        (Some(DEFAULT_TAG), None) => parsed.name_without_tag(),
        _ => name.to_string(),
    })
}
