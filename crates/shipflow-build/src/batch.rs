//! 複数イメージのビルド・プッシュ
//!
//! イメージを定義順に処理し、失敗時の方針（即時停止／継続）と
//! キャンセルを扱います。並列数を上げても結果は入力順のままです。

use crate::builder::{BuildOrchestrator, BuildOutcome, BuildParams};
use crate::error::{BuildError, BuildResult};
use crate::pusher::{PushOrchestrator, PushOutcome};
use futures_util::StreamExt;
use futures_util::stream;
use shipflow_core::ImageDefinition;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 実行する処理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Build,
    Push,
    BuildAndPush,
}

impl BatchMode {
    pub fn includes_build(self) -> bool {
        matches!(self, Self::Build | Self::BuildAndPush)
    }

    pub fn includes_push(self) -> bool {
        matches!(self, Self::Push | Self::BuildAndPush)
    }
}

/// 失敗時の方針
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// 最初の失敗以降、新しいイメージを開始しない
    #[default]
    FailFast,
    /// 失敗を記録して次のイメージに進む
    Continue,
}

/// バッチのキャンセル要求
///
/// キャンセル後は新しいイメージを開始しません。実行中のイメージは完了まで進みます。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// イメージごとの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Succeeded,
    /// ビルド設定が無い pull 専用イメージ
    Skipped,
    Failed,
    /// 失敗またはキャンセルにより開始されなかった
    NotStarted,
}

/// イメージごとの結果
#[derive(Debug)]
pub struct ImageReport {
    pub image: String,
    pub build: Option<BuildOutcome>,
    pub push: Option<PushOutcome>,
    pub status: ImageStatus,
    pub error: Option<BuildError>,
}

impl ImageReport {
    fn not_started(image: &ImageDefinition) -> Self {
        Self {
            image: image.name.clone(),
            build: None,
            push: None,
            status: ImageStatus::NotStarted,
            error: None,
        }
    }
}

/// バッチ全体の結果（入力順）
#[derive(Debug, Default)]
pub struct BatchReport {
    pub images: Vec<ImageReport>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &ImageReport> {
        self.images
            .iter()
            .filter(|r| r.status == ImageStatus::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.images
            .iter()
            .all(|r| matches!(r.status, ImageStatus::Succeeded | ImageStatus::Skipped))
    }

    pub fn count(&self, status: ImageStatus) -> usize {
        self.images.iter().filter(|r| r.status == status).count()
    }

    /// 最初のエラーを返す（失敗が無ければレポート自体）
    pub fn into_result(mut self) -> BuildResult<Self> {
        match self.images.iter_mut().find_map(|r| r.error.take()) {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// 複数イメージのビルド・プッシュを駆動する
pub struct BatchDriver {
    builder: BuildOrchestrator,
    pusher: PushOrchestrator,
    policy: FailurePolicy,
    concurrency: usize,
    registry_override: Option<String>,
    cancel: CancelToken,
}

impl BatchDriver {
    pub fn new(builder: BuildOrchestrator, pusher: PushOrchestrator) -> Self {
        Self {
            builder,
            pusher,
            policy: FailurePolicy::default(),
            concurrency: 1,
            registry_override: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 同時に処理するイメージ数（最小1）
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// プッシュ先レジストリの指定（CLI `--registry`）
    pub fn with_registry_override(mut self, registry: Option<String>) -> Self {
        self.registry_override = registry;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// イメージを順に処理
    pub async fn run(
        &self,
        images: &[ImageDefinition],
        mode: BatchMode,
        params: &BuildParams,
    ) -> BatchReport {
        tracing::info!(
            "Processing {} image(s) ({:?}, policy {:?}, concurrency {})",
            images.len(),
            mode,
            self.policy,
            self.concurrency
        );

        let failed = AtomicBool::new(false);
        let failed = &failed;

        let images = stream::iter(images)
            .map(|image| async move {
                if self.cancel.is_cancelled() {
                    tracing::info!("Cancelled, not starting {}", image.name);
                    return ImageReport::not_started(image);
                }
                if self.policy == FailurePolicy::FailFast && failed.load(Ordering::SeqCst) {
                    tracing::info!("Earlier image failed, not starting {}", image.name);
                    return ImageReport::not_started(image);
                }

                let report = self.process(image, mode, params).await;
                if report.status == ImageStatus::Failed {
                    failed.store(true, Ordering::SeqCst);
                }
                report
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        BatchReport { images }
    }

    async fn process(
        &self,
        image: &ImageDefinition,
        mode: BatchMode,
        params: &BuildParams,
    ) -> ImageReport {
        let mut report = ImageReport {
            image: image.name.clone(),
            build: None,
            push: None,
            status: if image.is_pull_only() {
                ImageStatus::Skipped
            } else {
                ImageStatus::Succeeded
            },
            error: None,
        };

        if mode.includes_build() {
            match self.builder.build(image, params).await {
                Ok(outcome) => report.build = Some(outcome),
                Err(e) => {
                    tracing::error!("Build failed for {}: {}", image.name, e);
                    report.status = ImageStatus::Failed;
                    report.error = Some(e);
                    return report;
                }
            }
        }

        if mode.includes_push() {
            match self
                .pusher
                .push(image, self.registry_override.as_deref())
                .await
            {
                Ok(outcome) => report.push = Some(outcome),
                Err(e) => {
                    tracing::error!("Push failed for {}: {}", image.name, e);
                    report.status = ImageStatus::Failed;
                    report.error = Some(e);
                }
            }
        }

        report
    }
}
