//! Docker デーモンへのアクセス
//!
//! オーケストレーターは [`DaemonAccess`] 越しにのみデーモンを操作します。
//! 本番実装の [`DockerDaemon`] は bollard を使い、操作ごとにタイムアウトを設けます。

use crate::auth::AuthConfig;
use crate::context::BuildArchive;
use crate::error::{BuildError, BuildResult, PushFailureKind};
use crate::registry::RegistryTarget;
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{BuildInfo, PushImageInfo};
use futures_util::StreamExt;
use http_body_util::{Either, Full};
use shipflow_core::ImageName;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// デーモンへのビルド要求
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    /// ビルド結果に付けるイメージ名
    pub name: &'a str,
    pub archive: &'a BuildArchive,
    /// アーカイブ内の Dockerfile パス（None ならアーカイブ直下の `Dockerfile`）
    pub dockerfile: Option<&'a str>,
    pub no_cache: bool,
    /// 中間コンテナを削除する
    pub remove_intermediate: bool,
    pub build_args: &'a HashMap<String, String>,
    pub target: Option<&'a str>,
}

/// コンテナデーモンに対する操作
#[async_trait]
pub trait DaemonAccess: Send + Sync {
    /// イメージをビルドし、`request.name` でタグ付けする
    async fn build_image(&self, request: BuildRequest<'_>) -> BuildResult<()>;

    /// 名前に対応するイメージIDを取得（存在しなければ None）
    async fn query_image_id(&self, name: &str) -> BuildResult<Option<String>>;

    /// イメージを削除（削除されなかった場合は false）
    async fn remove_image(&self, id: &str, force: bool) -> BuildResult<bool>;

    /// イメージ参照をプッシュ
    async fn push_image(
        &self,
        name: &str,
        auth: Option<&AuthConfig>,
        target: &RegistryTarget,
    ) -> BuildResult<()>;
}

/// 操作ごとのタイムアウト
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonTimeouts {
    pub build: Duration,
    pub query: Duration,
    pub remove: Duration,
    pub push: Duration,
}

impl Default for DaemonTimeouts {
    fn default() -> Self {
        Self {
            build: Duration::from_secs(30 * 60),
            query: Duration::from_secs(30),
            remove: Duration::from_secs(60),
            push: Duration::from_secs(30 * 60),
        }
    }
}

/// bollard を使った DaemonAccess の実装
pub struct DockerDaemon {
    docker: Docker,
    timeouts: DaemonTimeouts,
}

impl DockerDaemon {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            timeouts: DaemonTimeouts::default(),
        }
    }

    /// ローカルのデフォルト設定（ソケット／DOCKER_HOST）で接続
    pub fn connect() -> BuildResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BuildError::access("local daemon", e))?;
        Ok(Self::new(docker))
    }

    pub fn with_timeouts(mut self, timeouts: DaemonTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// デーモンの疎通確認
    pub async fn ping(&self) -> BuildResult<()> {
        with_timeout("ping", self.timeouts.query, async {
            self.docker
                .ping()
                .await
                .map(|_| ())
                .map_err(|e| BuildError::access("ping", e))
        })
        .await
    }

    async fn build_stream(&self, request: BuildRequest<'_>) -> BuildResult<()> {
        let context = request.archive.read().await.map_err(|e| BuildError::Archive {
            image: request.name.to_string(),
            message: e.to_string(),
        })?;

        #[allow(deprecated)]
        let options = bollard::image::BuildImageOptions::<String> {
            dockerfile: request.dockerfile.unwrap_or("Dockerfile").to_string(),
            t: request.name.to_string(),
            buildargs: request.build_args.clone(),
            target: request.target.unwrap_or_default().to_string(),
            nocache: request.no_cache,
            rm: request.remove_intermediate,
            forcerm: request.remove_intermediate,
            ..Default::default()
        };

        if !request.build_args.is_empty() {
            // 値は機密を含む可能性があるためキーのみ
            tracing::debug!(
                "Build args: {:?}",
                request.build_args.keys().collect::<Vec<_>>()
            );
        }

        let body = Full::new(context);
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(output) => handle_build_output(request.name, output)?,
                Err(bollard::errors::Error::DockerResponseServerError { message, .. }) => {
                    return Err(BuildError::BuildFailed {
                        image: request.name.to_string(),
                        message,
                    });
                }
                Err(e) => return Err(BuildError::access(request.name, e)),
            }
        }

        Ok(())
    }

    async fn push_stream(
        &self,
        repository: &str,
        tag: &str,
        display_name: &str,
        auth: Option<&AuthConfig>,
    ) -> BuildResult<()> {
        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> {
            tag: tag.to_string(),
        };

        #[allow(deprecated)]
        let mut stream = self.docker.push_image(
            repository,
            Some(options),
            auth.map(AuthConfig::to_docker_credentials),
        );

        let mut last_status = String::new();
        let mut error_message: Option<String> = None;

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(err) = info.error {
                        error_message = Some(err);
                    } else {
                        handle_push_progress(&info, &mut last_status);
                    }
                }
                Err(e) => {
                    return Err(BuildError::PushFailed {
                        name: display_name.to_string(),
                        kind: classify_bollard_error(&e),
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(message) = error_message {
            return Err(BuildError::PushFailed {
                name: display_name.to_string(),
                kind: PushFailureKind::classify(None, &message),
                message,
            });
        }

        Ok(())
    }

    async fn tag(&self, source: &str, repository: &str, tag: &str) -> BuildResult<()> {
        #[allow(deprecated)]
        let options = bollard::image::TagImageOptions::<String> {
            repo: repository.to_string(),
            tag: tag.to_string(),
        };

        with_timeout("tag", self.timeouts.query, async {
            self.docker
                .tag_image(source, Some(options))
                .await
                .map_err(|e| BuildError::access(source, e))
        })
        .await
    }
}

#[async_trait]
impl DaemonAccess for DockerDaemon {
    async fn build_image(&self, request: BuildRequest<'_>) -> BuildResult<()> {
        tracing::info!("Building image: {}", request.name);

        with_timeout("build", self.timeouts.build, self.build_stream(request)).await?;

        tracing::info!("Successfully built: {}", request.name);
        Ok(())
    }

    async fn query_image_id(&self, name: &str) -> BuildResult<Option<String>> {
        with_timeout("inspect", self.timeouts.query, async {
            match self.docker.inspect_image(name).await {
                Ok(info) => Ok(info.id),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    ..
                }) => Ok(None),
                Err(e) => Err(BuildError::access(name, e)),
            }
        })
        .await
    }

    async fn remove_image(&self, id: &str, force: bool) -> BuildResult<bool> {
        #[allow(deprecated)]
        let options = bollard::image::RemoveImageOptions {
            force,
            ..Default::default()
        };

        with_timeout("remove", self.timeouts.remove, async {
            match self.docker.remove_image(id, Some(options), None).await {
                Ok(_) => Ok(true),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404 | 409,
                    message,
                }) => {
                    tracing::debug!("Image {} was not removed: {}", id, message);
                    Ok(false)
                }
                Err(e) => Err(BuildError::access(id, e)),
            }
        })
        .await
    }

    async fn push_image(
        &self,
        name: &str,
        auth: Option<&AuthConfig>,
        target: &RegistryTarget,
    ) -> BuildResult<()> {
        let parsed = ImageName::parse(name)?;
        let tag = parsed.tag_or_default().to_string();

        // 名前に含まれないレジストリへは一時タグを付けてプッシュする
        let temporary_repository = match target {
            RegistryTarget::Explicit(registry)
                if !parsed.name_without_tag().starts_with(&format!("{}/", registry)) =>
            {
                Some(format!("{}/{}", registry, parsed.repository()))
            }
            _ => None,
        };

        let repository = match &temporary_repository {
            Some(temporary) => {
                self.tag(name, temporary, &tag)
                    .await
                    .map_err(|e| push_failure(name, e))?;
                temporary.clone()
            }
            None => parsed.name_without_tag(),
        };

        tracing::info!("Pushing {}:{}", repository, tag);
        let pushed = with_timeout(
            "push",
            self.timeouts.push,
            self.push_stream(&repository, &tag, name, auth),
        )
        .await
        .map_err(|e| push_failure(name, e));

        if let Some(temporary) = &temporary_repository {
            let reference = format!("{}:{}", temporary, tag);
            if let Err(e) = self.remove_image(&reference, false).await {
                tracing::warn!("Failed to remove temporary tag {}: {}", reference, e);
            }
        }

        pushed
    }
}

async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> BuildResult<T>
where
    F: Future<Output = BuildResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| BuildError::Timeout {
            operation: operation.to_string(),
            elapsed: limit,
        })?
}

/// プッシュ中の通信エラー・タイムアウトを、失敗した参照名付きの PushFailed にする
fn push_failure(name: &str, err: BuildError) -> BuildError {
    match err {
        BuildError::Timeout { .. } | BuildError::Access { .. } | BuildError::DockerConnection(_) => {
            BuildError::PushFailed {
                name: name.to_string(),
                kind: PushFailureKind::Network,
                message: err.to_string(),
            }
        }
        other => other,
    }
}

/// ビルド出力の処理
fn handle_build_output(image: &str, output: BuildInfo) -> BuildResult<()> {
    if let Some(stream) = output.stream {
        let line = stream.trim_end();
        if !line.is_empty() {
            tracing::info!(target: "shipflow::build", "{}", line);
        }
    }

    if let Some(error_detail) = output.error_detail {
        let message = error_detail
            .message
            .or(output.error)
            .unwrap_or_else(|| "Unknown build error".to_string());
        return Err(BuildError::BuildFailed {
            image: image.to_string(),
            message,
        });
    }

    if let Some(error) = output.error {
        return Err(BuildError::BuildFailed {
            image: image.to_string(),
            message: error,
        });
    }

    if let Some(status) = output.status {
        tracing::debug!("{}", status);
    }

    Ok(())
}

/// プッシュ進捗の処理
fn handle_push_progress(info: &PushImageInfo, last_status: &mut String) {
    if let Some(status) = &info.status {
        match status.as_str() {
            "Pushing" => {
                tracing::trace!("{} {}", status, info.progress.as_deref().unwrap_or(""));
            }
            // 準備中は表示をスキップ（ノイズ軽減）
            "Preparing" | "Waiting" => {}
            _ => {
                if status != last_status {
                    tracing::debug!("{}", status);
                    *last_status = status.clone();
                }
            }
        }
    }
}

/// bollard のエラーからプッシュ失敗の原因を判定
fn classify_bollard_error(err: &bollard::errors::Error) -> PushFailureKind {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => PushFailureKind::classify(Some(*status_code), message),
        other => match PushFailureKind::classify(None, &other.to_string()) {
            // デーモンの応答が無いものは通信エラー扱い
            PushFailureKind::Rejected => PushFailureKind::Network,
            kind => kind,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_server_errors() {
        let unauthorized = bollard::errors::Error::DockerResponseServerError {
            status_code: 401,
            message: "unauthorized".to_string(),
        };
        let unavailable = bollard::errors::Error::DockerResponseServerError {
            status_code: 503,
            message: "service unavailable".to_string(),
        };
        let rejected = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "manifest invalid".to_string(),
        };

        assert_eq!(classify_bollard_error(&unauthorized), PushFailureKind::Auth);
        assert_eq!(classify_bollard_error(&unavailable), PushFailureKind::Network);
        assert_eq!(classify_bollard_error(&rejected), PushFailureKind::Rejected);
    }

    #[test]
    fn test_build_output_error_detail() {
        let output = BuildInfo {
            error_detail: Some(bollard::models::ErrorDetail {
                message: Some("RUN exited with code 1".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let err = handle_build_output("app:latest", output).unwrap_err();
        assert!(matches!(
            err,
            BuildError::BuildFailed { ref message, .. } if message == "RUN exited with code 1"
        ));
    }

    #[test]
    fn test_build_output_stream_is_ok() {
        let output = BuildInfo {
            stream: Some("Step 1/2 : FROM alpine\n".to_string()),
            ..Default::default()
        };
        assert!(handle_build_output("app", output).is_ok());
    }

    #[tokio::test]
    async fn test_with_timeout_elapsed() {
        let result: BuildResult<()> = with_timeout("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(BuildError::Timeout { ref operation, .. }) if operation == "slow"
        ));
    }

    #[test]
    fn test_push_failure_names_the_reference() {
        let timeout = push_failure(
            "myapp:v1",
            BuildError::Timeout {
                operation: "push".to_string(),
                elapsed: Duration::from_millis(200),
            },
        );
        assert!(matches!(
            timeout,
            BuildError::PushFailed { ref name, kind: PushFailureKind::Network, .. } if name == "myapp:v1"
        ));
        assert!(timeout.is_retryable());

        let rejected = BuildError::PushFailed {
            name: "myapp:v1".to_string(),
            kind: PushFailureKind::Rejected,
            message: "manifest invalid".to_string(),
        };
        assert!(matches!(
            push_failure("myapp:v1", rejected),
            BuildError::PushFailed { kind: PushFailureKind::Rejected, ref message, .. } if message == "manifest invalid"
        ));
    }

    #[tokio::test]
    async fn test_push_timeout_names_the_reference() {
        // 接続は受け付けるが応答しないデーモン
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let docker = Docker::connect_with_http(
            &format!("http://{}", addr),
            120,
            bollard::API_DEFAULT_VERSION,
        )
        .unwrap();
        let daemon = DockerDaemon::new(docker).with_timeouts(DaemonTimeouts {
            push: Duration::from_millis(200),
            ..DaemonTimeouts::default()
        });

        let err = daemon
            .push_image("myapp:v1", None, &RegistryTarget::DaemonDefault)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BuildError::PushFailed { ref name, kind: PushFailureKind::Network, .. } if name == "myapp:v1"
        ));
        assert!(err.to_string().contains("myapp:v1"));
        assert!(err.to_string().contains("200ms"));
    }

    #[tokio::test]
    #[ignore] // Docker接続が必要なため、通常のテストではスキップ
    async fn test_query_missing_image() {
        let daemon = DockerDaemon::connect().unwrap();
        let id = daemon
            .query_image_id("shipflow-test/does-not-exist:never")
            .await
            .unwrap();
        assert_eq!(id, None);
    }

    #[tokio::test]
    #[ignore] // Docker接続が必要なため、通常のテストではスキップ
    async fn test_build_simple_image() {
        use crate::context::{ArchiveService, ContextParams, TarArchiveService};
        use shipflow_core::{BuildSpec, ImageDefinition};
        use std::fs;
        use tempfile::tempdir;

        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("Dockerfile"),
            "FROM alpine:latest\nCMD echo 'test'",
        )
        .unwrap();

        let image = ImageDefinition::new("shipflow-test:latest");
        let archive = TarArchiveService::new()
            .create_archive(
                &image,
                &BuildSpec::default(),
                &ContextParams::new(temp_dir.path()),
            )
            .await
            .unwrap();

        let daemon = DockerDaemon::connect().unwrap();
        let args = HashMap::new();
        daemon
            .build_image(BuildRequest {
                name: "shipflow-test:latest",
                archive: &archive,
                dockerfile: None,
                no_cache: false,
                remove_intermediate: true,
                build_args: &args,
                target: None,
            })
            .await
            .unwrap();

        let id = daemon.query_image_id("shipflow-test:latest").await.unwrap();
        assert!(id.is_some());

        // クリーンアップ
        daemon
            .remove_image("shipflow-test:latest", true)
            .await
            .ok();
    }
}
