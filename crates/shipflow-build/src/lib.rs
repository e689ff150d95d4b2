//! ShipFlow image build orchestration
//!
//! イメージ定義ごとにビルドコンテキストの作成、ビルド、
//! 旧イメージのクリーンアップ、レジストリ認証、タグのファンアウトを伴うプッシュを
//! 順序立てて実行します。Docker デーモンとアーカイブ作成は
//! [`DaemonAccess`] / [`ArchiveService`] の境界越しに呼び出します。

pub mod auth;
pub mod batch;
pub mod builder;
pub mod context;
pub mod daemon;
pub mod error;
pub mod pusher;
pub mod registry;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{
    AuthConfig, AuthDirection, CredentialResolver, MASTER_KEY_ENV, decode_master_key,
    encrypt_password, generate_master_key,
};
pub use batch::{
    BatchDriver, BatchMode, BatchReport, CancelToken, FailurePolicy, ImageReport, ImageStatus,
};
pub use builder::{BuildOrchestrator, BuildOutcome, BuildParams, BuildStage, CleanupOutcome};
pub use context::{ArchiveService, BuildArchive, ContextParams, TarArchiveService};
pub use daemon::{BuildRequest, DaemonAccess, DaemonTimeouts, DockerDaemon};
pub use error::{BuildError, BuildResult, ErrorKind, PushFailureKind};
pub use pusher::{PushOrchestrator, PushOutcome};
pub use registry::{DEFAULT_REGISTRY, RegistryTarget, configured_registry, resolve_registry};
pub use resolver::BuildResolver;
