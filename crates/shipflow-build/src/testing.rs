//! テスト用のデーモン・アーカイブ実装
//!
//! 呼び出しを記録し、応答と失敗をスクリプトで指定できます。

use crate::auth::AuthConfig;
use crate::context::{ArchiveService, BuildArchive, ContextParams};
use crate::daemon::{BuildRequest, DaemonAccess};
use crate::error::{BuildError, BuildResult, PushFailureKind};
use crate::registry::RegistryTarget;
use async_trait::async_trait;
use shipflow_core::{BuildSpec, ImageDefinition};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// RecordingDaemon が受けた呼び出し
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonCall {
    Build {
        name: String,
        no_cache: bool,
        remove_intermediate: bool,
        dockerfile: Option<String>,
        build_args: HashMap<String, String>,
        /// ビルド時点でアーカイブが存在していたか
        archive_present: bool,
    },
    Query(String),
    Remove {
        id: String,
        force: bool,
    },
    Push {
        name: String,
        auth: Option<AuthConfig>,
        target: RegistryTarget,
    },
}

/// 呼び出しを記録するデーモン
#[derive(Default)]
pub struct RecordingDaemon {
    calls: Mutex<Vec<DaemonCall>>,
    image_ids: Mutex<HashMap<String, VecDeque<Option<String>>>>,
    failing_builds: HashSet<String>,
    failing_pushes: HashMap<String, PushFailureKind>,
    remove_result: Option<bool>,
    remove_error: bool,
}

impl RecordingDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// `query_image_id(name)` が順に返すID（尽きたら None）
    pub fn with_image_ids(self, name: &str, ids: &[Option<&str>]) -> Self {
        if let Ok(mut map) = self.image_ids.lock() {
            map.insert(
                name.to_string(),
                ids.iter().map(|id| id.map(str::to_string)).collect(),
            );
        }
        self
    }

    pub fn failing_build(mut self, name: &str) -> Self {
        self.failing_builds.insert(name.to_string());
        self
    }

    pub fn failing_push(mut self, name: &str, kind: PushFailureKind) -> Self {
        self.failing_pushes.insert(name.to_string(), kind);
        self
    }

    /// remove_image の戻り値（既定は true）
    pub fn remove_returns(mut self, removed: bool) -> Self {
        self.remove_result = Some(removed);
        self
    }

    pub fn remove_errors(mut self) -> Self {
        self.remove_error = true;
        self
    }

    pub fn calls(&self) -> Vec<DaemonCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn builds(&self) -> Vec<DaemonCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, DaemonCall::Build { .. }))
            .collect()
    }

    pub fn removals(&self) -> Vec<(String, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DaemonCall::Remove { id, force } => Some((id, force)),
                _ => None,
            })
            .collect()
    }

    pub fn pushes(&self) -> Vec<(String, Option<AuthConfig>, RegistryTarget)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DaemonCall::Push { name, auth, target } => Some((name, auth, target)),
                _ => None,
            })
            .collect()
    }

    pub fn pushed_names(&self) -> Vec<String> {
        self.pushes().into_iter().map(|(name, _, _)| name).collect()
    }

    fn record(&self, call: DaemonCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl DaemonAccess for RecordingDaemon {
    async fn build_image(&self, request: BuildRequest<'_>) -> BuildResult<()> {
        self.record(DaemonCall::Build {
            name: request.name.to_string(),
            no_cache: request.no_cache,
            remove_intermediate: request.remove_intermediate,
            dockerfile: request.dockerfile.map(str::to_string),
            build_args: request.build_args.clone(),
            archive_present: request.archive.path().exists(),
        });

        if self.failing_builds.contains(request.name) {
            return Err(BuildError::BuildFailed {
                image: request.name.to_string(),
                message: "step 2/3 failed".to_string(),
            });
        }
        Ok(())
    }

    async fn query_image_id(&self, name: &str) -> BuildResult<Option<String>> {
        self.record(DaemonCall::Query(name.to_string()));
        let id = self
            .image_ids
            .lock()
            .ok()
            .and_then(|mut map| map.get_mut(name).and_then(VecDeque::pop_front))
            .flatten();
        Ok(id)
    }

    async fn remove_image(&self, id: &str, force: bool) -> BuildResult<bool> {
        self.record(DaemonCall::Remove {
            id: id.to_string(),
            force,
        });

        if self.remove_error {
            return Err(BuildError::Access {
                target: id.to_string(),
                message: "conflict: image is being used by running container".to_string(),
            });
        }
        Ok(self.remove_result.unwrap_or(true))
    }

    async fn push_image(
        &self,
        name: &str,
        auth: Option<&AuthConfig>,
        target: &RegistryTarget,
    ) -> BuildResult<()> {
        self.record(DaemonCall::Push {
            name: name.to_string(),
            auth: auth.cloned(),
            target: target.clone(),
        });

        if let Some(kind) = self.failing_pushes.get(name) {
            return Err(BuildError::PushFailed {
                name: name.to_string(),
                kind: *kind,
                message: format!("scripted {} failure", kind),
            });
        }
        Ok(())
    }
}

/// 小さな一時ファイルを返すアーカイブサービス
#[derive(Default)]
pub struct FakeArchiveService {
    created: Mutex<Vec<PathBuf>>,
    failing: HashSet<String>,
}

impl FakeArchiveService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// 作成したアーカイブのパス
    pub fn created_paths(&self) -> Vec<PathBuf> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn created_count(&self) -> usize {
        self.created_paths().len()
    }
}

#[async_trait]
impl ArchiveService for FakeArchiveService {
    async fn create_archive(
        &self,
        image: &ImageDefinition,
        _spec: &BuildSpec,
        _params: &ContextParams,
    ) -> BuildResult<BuildArchive> {
        if self.failing.contains(&image.name) {
            return Err(BuildError::Archive {
                image: image.name.clone(),
                message: "context directory unreadable".to_string(),
            });
        }

        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"fake build context")?;
        let archive = BuildArchive::from_temp_file(file)?;

        if let Ok(mut created) = self.created.lock() {
            created.push(archive.path().to_path_buf());
        }
        Ok(archive)
    }
}
