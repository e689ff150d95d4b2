//! ビルドコンテキストのアーカイブ作成

use crate::error::{BuildError, BuildResult};
use crate::resolver::BuildResolver;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use glob::{MatchOptions, Pattern};
use shipflow_core::{BuildSpec, ImageDefinition};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::Builder;
use tempfile::NamedTempFile;

const MAX_CONTEXT_SIZE: u64 = 500 * 1024 * 1024; // 500MB

/// アーカイブ作成時のパラメータ
#[derive(Debug, Clone, Default)]
pub struct ContextParams {
    /// 相対パス（context / dockerfile）の基準ディレクトリ
    pub project_root: PathBuf,
}

impl ContextParams {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }
}

/// パック済みのビルドコンテキスト
///
/// 一時ファイルとして保持し、drop または [`BuildArchive::release`] で削除されます。
pub struct BuildArchive {
    file: NamedTempFile,
    size: u64,
}

impl BuildArchive {
    pub fn from_temp_file(file: NamedTempFile) -> std::io::Result<Self> {
        let size = file.as_file().metadata()?.len();
        Ok(Self { file, size })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// アーカイブの内容を読み込み
    pub async fn read(&self) -> std::io::Result<Bytes> {
        tokio::fs::read(self.path()).await.map(Bytes::from)
    }

    /// 一時ファイルを削除
    pub fn release(self) -> std::io::Result<()> {
        self.file.close()
    }
}

impl std::fmt::Debug for BuildArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildArchive")
            .field("path", &self.path())
            .field("size", &self.size)
            .finish()
    }
}

/// ビルドコンテキストのアーカイブを作成するサービス
#[async_trait]
pub trait ArchiveService: Send + Sync {
    async fn create_archive(
        &self,
        image: &ImageDefinition,
        spec: &BuildSpec,
        params: &ContextParams,
    ) -> BuildResult<BuildArchive>;
}

/// コンテキストディレクトリを tar.gz にパックする ArchiveService
#[derive(Debug, Default, Clone)]
pub struct TarArchiveService;

impl TarArchiveService {
    pub fn new() -> Self {
        Self
    }

    /// ビルドコンテキストをtar.gzアーカイブとして書き出し
    ///
    /// `.dockerignore` に一致するファイルは除外し、
    /// Dockerfile はアーカイブ直下に `Dockerfile` として格納します。
    pub fn write_context<W: Write>(
        context_path: &Path,
        dockerfile_path: &Path,
        out: W,
    ) -> BuildResult<()> {
        tracing::debug!("Creating build context from: {}", context_path.display());

        let ignore = DockerIgnore::load(context_path)?;
        let encoder = GzEncoder::new(out, Compression::default());
        let mut tar = Builder::new(encoder);
        tar.follow_symlinks(false);

        append_dir_filtered(&mut tar, context_path, Path::new(""), &ignore)?;

        // Dockerfileを "Dockerfile" として追加
        let dockerfile_content = fs::read(dockerfile_path)?;

        let mut header = tar::Header::new_gnu();
        header.set_path("Dockerfile").map_err(|e| {
            BuildError::InvalidConfig(format!("Failed to set Dockerfile path: {}", e))
        })?;
        header.set_size(dockerfile_content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();

        tar.append(&header, &dockerfile_content[..])?;

        let encoder = tar.into_inner()?;
        encoder.finish()?.flush()?;

        Ok(())
    }

    fn pack(context_path: &Path, dockerfile_path: &Path) -> BuildResult<BuildArchive> {
        let mut file = tempfile::Builder::new()
            .prefix("shipflow-context-")
            .suffix(".tar.gz")
            .tempfile()?;

        Self::write_context(
            context_path,
            dockerfile_path,
            BufWriter::new(file.as_file_mut()),
        )?;

        let archive = BuildArchive::from_temp_file(file)?;
        tracing::debug!("Build context created: {} bytes", archive.size());

        // コンテキストサイズの警告
        check_context_size(archive.size());

        Ok(archive)
    }
}

#[async_trait]
impl ArchiveService for TarArchiveService {
    async fn create_archive(
        &self,
        image: &ImageDefinition,
        spec: &BuildSpec,
        params: &ContextParams,
    ) -> BuildResult<BuildArchive> {
        let resolver = BuildResolver::new(params.project_root.clone());
        let context_path = resolver.resolve_context(spec)?;
        let dockerfile_path = resolver.resolve_dockerfile(spec)?;

        let packed =
            tokio::task::spawn_blocking(move || Self::pack(&context_path, &dockerfile_path))
                .await
                .map_err(|e| BuildError::Archive {
                    image: image.name.clone(),
                    message: format!("archive task failed: {}", e),
                })?;

        packed.map_err(|e| match e {
            BuildError::Io(io) => BuildError::Archive {
                image: image.name.clone(),
                message: io.to_string(),
            },
            other => other,
        })
    }
}

/// コンテキストサイズのチェックと警告
fn check_context_size(size: u64) {
    if size > MAX_CONTEXT_SIZE {
        tracing::warn!(
            "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
             .dockerignoreファイルで不要なファイルを除外することを推奨します。",
            size / 1024 / 1024
        );
    }
}

/// ディレクトリを再帰的に追加（.dockerignore と直下の Dockerfile を除外）
fn append_dir_filtered<W: Write>(
    tar: &mut Builder<W>,
    dir: &Path,
    relative: &Path,
    ignore: &DockerIgnore,
) -> BuildResult<()> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let rel = relative.join(entry.file_name());

        // Dockerfile は最後に別途追加する
        if relative.as_os_str().is_empty() && entry.file_name() == "Dockerfile" {
            continue;
        }

        let file_type = entry.file_type()?;
        let ignored = ignore.is_ignored(&rel);

        if file_type.is_dir() {
            // 否定パターンがある場合は配下を個別に判定する
            if ignored && !ignore.has_negations() {
                continue;
            }
            if !ignored {
                tar.append_dir(&rel, &path)?;
            }
            append_dir_filtered(tar, &path, &rel, ignore)?;
        } else if !ignored {
            tar.append_path_with_name(&path, &rel)?;
        }
    }

    Ok(())
}

/// .dockerignore のパターン
struct DockerIgnore {
    patterns: Vec<(Pattern, bool)>,
}

impl DockerIgnore {
    fn load(context_path: &Path) -> BuildResult<Self> {
        let path = context_path.join(".dockerignore");
        if !path.is_file() {
            return Ok(Self {
                patterns: Vec::new(),
            });
        }

        Self::parse(&fs::read_to_string(&path)?)
    }

    fn parse(content: &str) -> BuildResult<Self> {
        let mut patterns = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (negated, raw) = match line.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, line),
            };
            let raw = raw.trim_start_matches("./").trim_start_matches('/');
            let raw = raw.trim_end_matches('/');
            if raw.is_empty() {
                continue;
            }

            let pattern = Pattern::new(raw).map_err(|e| {
                BuildError::InvalidConfig(format!("Invalid .dockerignore pattern '{}': {}", line, e))
            })?;
            patterns.push((pattern, negated));
        }

        Ok(Self { patterns })
    }

    fn has_negations(&self) -> bool {
        self.patterns.iter().any(|(_, negated)| *negated)
    }

    /// パスまたはその親ディレクトリが除外対象か（後のパターンが優先）
    fn is_ignored(&self, rel: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        let options = MatchOptions {
            require_literal_separator: true,
            ..Default::default()
        };

        let mut ignored = false;
        let mut prefix = PathBuf::new();
        for component in rel.components() {
            prefix.push(component);
            let candidate = prefix.to_string_lossy().replace('\\', "/");
            for (pattern, negated) in &self.patterns {
                if pattern.matches_with(&candidate, options) {
                    ignored = !negated;
                }
            }
        }

        ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn entries_of(archive: &[u8]) -> HashSet<String> {
        let decoder = flate2::read::GzDecoder::new(archive);
        let mut tar = tar::Archive::new(decoder);
        tar.entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_write_context() {
        let temp_dir = tempdir().unwrap();

        // テスト用のファイル構造を作成
        fs::write(temp_dir.path().join("file1.txt"), "content1").unwrap();
        fs::write(temp_dir.path().join("file2.txt"), "content2").unwrap();

        let subdir = temp_dir.path().join("subdir");
        fs::create_dir(&subdir).unwrap();
        fs::write(subdir.join("file3.txt"), "content3").unwrap();

        // Dockerfileを作成
        let dockerfile = temp_dir.path().join("Dockerfile");
        fs::write(&dockerfile, "FROM alpine\nRUN echo test").unwrap();

        let mut archive = Vec::new();
        TarArchiveService::write_context(temp_dir.path(), &dockerfile, &mut archive).unwrap();
        assert!(!archive.is_empty());

        // tarアーカイブとして展開できるか確認
        let extract_dir = tempdir().unwrap();
        let decoder = flate2::read::GzDecoder::new(&archive[..]);
        let mut tar = tar::Archive::new(decoder);
        tar.unpack(extract_dir.path()).unwrap();

        assert!(extract_dir.path().join("Dockerfile").exists());
        assert!(extract_dir.path().join("subdir/file3.txt").exists());

        // Dockerfile は1回だけ格納される
        let decoder = flate2::read::GzDecoder::new(&archive[..]);
        let count = tar::Archive::new(decoder)
            .entries()
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().unwrap().to_string_lossy() == "Dockerfile")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_external_dockerfile_is_stored_at_root() {
        let context = tempdir().unwrap();
        fs::write(context.path().join("app.txt"), "x").unwrap();

        let other = tempdir().unwrap();
        let dockerfile = other.path().join("build.dockerfile");
        fs::write(&dockerfile, "FROM scratch").unwrap();

        let mut archive = Vec::new();
        TarArchiveService::write_context(context.path(), &dockerfile, &mut archive).unwrap();

        let entries = entries_of(&archive);
        assert!(entries.contains("Dockerfile"));
        assert!(entries.contains("app.txt"));
    }

    #[test]
    fn test_dockerignore() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join(".dockerignore"), "# comment\ntarget\n*.log\n!keep.log\n").unwrap();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("debug.log"), "noise").unwrap();
        fs::write(root.join("keep.log"), "important").unwrap();
        fs::create_dir(root.join("target")).unwrap();
        fs::write(root.join("target/out.bin"), "bin").unwrap();
        fs::write(root.join("Dockerfile"), "FROM alpine").unwrap();

        let mut archive = Vec::new();
        TarArchiveService::write_context(root, &root.join("Dockerfile"), &mut archive).unwrap();

        let entries = entries_of(&archive);
        assert!(entries.contains("main.rs"));
        assert!(entries.contains("keep.log"));
        assert!(entries.contains("Dockerfile"));
        assert!(!entries.contains("debug.log"));
        assert!(!entries.contains("target"));
        assert!(!entries.contains("target/out.bin"));
    }

    #[test]
    fn test_dockerignore_star_does_not_cross_directories() {
        let ignore = DockerIgnore::parse("*.tmp\n").unwrap();
        assert!(ignore.is_ignored(Path::new("a.tmp")));
        assert!(!ignore.is_ignored(Path::new("sub/a.tmp")));

        let ignore = DockerIgnore::parse("**/*.tmp\n").unwrap();
        assert!(ignore.is_ignored(Path::new("sub/a.tmp")));
    }

    #[tokio::test]
    async fn test_create_archive_and_release() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("Dockerfile"), "FROM alpine").unwrap();

        let service = TarArchiveService::new();
        let image = ImageDefinition::new("myapp");
        let spec = BuildSpec::default();

        let archive = service
            .create_archive(&image, &spec, &ContextParams::new(temp_dir.path()))
            .await
            .unwrap();

        let path = archive.path().to_path_buf();
        assert!(path.exists());
        assert!(archive.size() > 0);
        assert_eq!(archive.read().await.unwrap().len() as u64, archive.size());

        archive.release().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_archive_removed_on_drop() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("Dockerfile"), "FROM alpine").unwrap();

        let archive = TarArchiveService::new()
            .create_archive(
                &ImageDefinition::new("myapp"),
                &BuildSpec::default(),
                &ContextParams::new(temp_dir.path()),
            )
            .await
            .unwrap();

        let path = archive.path().to_path_buf();
        drop(archive);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_create_archive_missing_dockerfile() {
        let temp_dir = tempdir().unwrap();

        let result = TarArchiveService::new()
            .create_archive(
                &ImageDefinition::new("myapp"),
                &BuildSpec::default(),
                &ContextParams::new(temp_dir.path()),
            )
            .await;

        assert!(matches!(result, Err(BuildError::DockerfileNotFound(_))));
    }
}
