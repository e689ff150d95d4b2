//! イメージのビルドと旧イメージのクリーンアップ

use crate::context::{ArchiveService, ContextParams};
use crate::daemon::{BuildRequest, DaemonAccess};
use crate::error::BuildResult;
use crate::resolver::BuildResolver;
use shipflow_core::{BuildSpec, ImageDefinition, ImageName};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// ビルドの進行段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuildStage {
    NotStarted,
    /// ビルドコンテキストのアーカイブ作成済み
    ArchiveReady,
    /// デーモンでのビルド完了
    Built,
    /// クリーンアップの判定・実行済み
    CleanupEvaluated,
    Done,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not-started",
            Self::ArchiveReady => "archive-ready",
            Self::Built => "built",
            Self::CleanupEvaluated => "cleanup-evaluated",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// ビルド全体に共通するパラメータ
#[derive(Debug, Clone, Default)]
pub struct BuildParams {
    /// 全イメージでキャッシュを無効化
    pub no_cache: bool,
    /// イメージ設定の args を上書きするビルド引数
    pub build_args: HashMap<String, String>,
    /// args 内の `{VAR}` 展開に使う変数
    pub variables: HashMap<String, String>,
    pub context: ContextParams,
}

/// 旧イメージのクリーンアップ結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// cleanup が無効
    NotRequested,
    /// 旧イメージが無い、またはIDが変わっていない
    NothingToRemove,
    Removed(String),
    /// 削除できなかった（ビルド自体は成功）
    Failed { id: String, reason: String },
}

/// ビルド結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// ビルド設定が無いため対象外
    Skipped,
    Built {
        old_id: Option<String>,
        new_id: Option<String>,
        cleanup: CleanupOutcome,
        stage: BuildStage,
    },
}

impl BuildOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// ビルドのオーケストレーター
///
/// 1. 既存イメージIDの取得
/// 2. ビルドコンテキストのアーカイブ作成
/// 3. デーモンでのビルド
/// 4. cleanup 指定時、IDが変わっていれば旧イメージを強制削除
pub struct BuildOrchestrator {
    daemon: Arc<dyn DaemonAccess>,
    archives: Arc<dyn ArchiveService>,
}

impl BuildOrchestrator {
    pub fn new(daemon: Arc<dyn DaemonAccess>, archives: Arc<dyn ArchiveService>) -> Self {
        Self { daemon, archives }
    }

    /// イメージをビルド
    pub async fn build(
        &self,
        image: &ImageDefinition,
        params: &BuildParams,
    ) -> BuildResult<BuildOutcome> {
        let Some(spec) = image.build.as_ref() else {
            tracing::debug!("{} has no build configuration, skipping", image.name);
            return Ok(BuildOutcome::Skipped);
        };

        ImageName::parse(&image.name)?;

        let span = tracing::info_span!(
            "build",
            image = %image.name,
            stage = %BuildStage::NotStarted
        );

        let mut stage = BuildStage::NotStarted;
        let result = self
            .run(image, spec, params, &mut stage)
            .instrument(span)
            .await;

        if let Err(e) = &result {
            tracing::warn!(
                image = %image.name,
                stage = %stage,
                "Build of {} stopped at stage {}: {}",
                image.name,
                stage,
                e
            );
        }

        result
    }

    async fn run(
        &self,
        image: &ImageDefinition,
        spec: &BuildSpec,
        params: &BuildParams,
        stage: &mut BuildStage,
    ) -> BuildResult<BuildOutcome> {
        let old_id = self.daemon.query_image_id(&image.name).await?;
        tracing::debug!("Existing image id for {}: {:?}", image.name, old_id);

        let archive = self
            .archives
            .create_archive(image, spec, &params.context)
            .await?;
        advance(stage, BuildStage::ArchiveReady);
        tracing::debug!("Build context ready: {} bytes", archive.size());

        let build_args = merge_build_args(spec, params);
        let built = self
            .daemon
            .build_image(BuildRequest {
                name: &image.name,
                archive: &archive,
                dockerfile: None,
                no_cache: spec.no_cache || params.no_cache,
                remove_intermediate: true,
                build_args: &build_args,
                target: spec.target.as_deref(),
            })
            .await;

        if let Err(e) = archive.release() {
            tracing::warn!("Failed to remove build context archive: {}", e);
        }
        built?;
        advance(stage, BuildStage::Built);

        let (new_id, cleanup) = if spec.cleanup {
            let new_id = self.daemon.query_image_id(&image.name).await?;
            let cleanup = self.cleanup(&image.name, old_id.as_deref(), new_id.as_deref()).await;
            (new_id, cleanup)
        } else {
            (None, CleanupOutcome::NotRequested)
        };
        advance(stage, BuildStage::CleanupEvaluated);

        tracing::info!("Built {}", image.description());
        advance(stage, BuildStage::Done);

        Ok(BuildOutcome::Built {
            old_id,
            new_id,
            cleanup,
            stage: *stage,
        })
    }

    async fn cleanup(
        &self,
        name: &str,
        old_id: Option<&str>,
        new_id: Option<&str>,
    ) -> CleanupOutcome {
        let (Some(old_id), Some(new_id)) = (old_id, new_id) else {
            return CleanupOutcome::NothingToRemove;
        };
        if old_id == new_id {
            tracing::debug!("{} is unchanged, nothing to clean up", name);
            return CleanupOutcome::NothingToRemove;
        }

        match self.daemon.remove_image(old_id, true).await {
            Ok(true) => {
                tracing::info!("Removed old image {} ({})", old_id, name);
                CleanupOutcome::Removed(old_id.to_string())
            }
            Ok(false) => {
                tracing::warn!("Old image {} of {} could not be removed", old_id, name);
                CleanupOutcome::Failed {
                    id: old_id.to_string(),
                    reason: "daemon did not remove the image".to_string(),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to remove old image {} of {}: {}", old_id, name, e);
                CleanupOutcome::Failed {
                    id: old_id.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn advance(stage: &mut BuildStage, next: BuildStage) {
    debug_assert!(next > *stage);
    *stage = next;
    tracing::Span::current().record("stage", tracing::field::display(next));
}

/// イメージ設定の args（変数展開済み）に共通のビルド引数を重ねる
fn merge_build_args(spec: &BuildSpec, params: &BuildParams) -> HashMap<String, String> {
    let resolver = BuildResolver::new(params.context.project_root.clone());
    let mut args = resolver.resolve_build_args(spec, &params.variables);
    args.extend(
        params
            .build_args
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    args
}
