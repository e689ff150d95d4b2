pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// 設定ファイル名の候補（優先順）
const CANDIDATES: [&str; 4] = [
    "shipflow.local.yaml",
    ".shipflow.local.yaml",
    "shipflow.yaml",
    ".shipflow.yaml",
];

/// プロジェクトの shipflow.yaml を探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 SHIPFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: shipflow.local.yaml, .shipflow.local.yaml, shipflow.yaml, .shipflow.yaml
/// 3. ./.shipflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/shipflow/shipflow.yaml (グローバル設定)
pub fn find_project_file() -> Result<PathBuf> {
    let current_dir = std::env::current_dir()?;
    find_project_file_in(&current_dir)
}

/// 指定ディレクトリを起点に設定ファイルを探す
pub fn find_project_file_in(dir: &Path) -> Result<PathBuf> {
    // 1. 環境変数で直接指定（指定先が無ければエラー）
    if let Ok(config_path) = std::env::var("SHIPFLOW_CONFIG_PATH") {
        let path = PathBuf::from(&config_path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(ConfigError::ConfigPathMissing(config_path));
    }

    // 2. 指定ディレクトリで検索
    if let Some(path) = first_existing(dir) {
        return Ok(path);
    }

    // 3. ./.shipflow/ ディレクトリで検索
    let shipflow_dir = dir.join(".shipflow");
    if shipflow_dir.is_dir()
        && let Some(path) = first_existing(&shipflow_dir)
    {
        return Ok(path);
    }

    // 4. グローバル設定ファイル (~/.config/shipflow/shipflow.yaml)
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("shipflow").join("shipflow.yaml");
        if global_config.is_file() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ProjectFileNotFound)
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|filename| dir.join(filename))
        .find(|path| path.is_file())
}

/// Docker の config.json のパス
///
/// DOCKER_CONFIG が設定されていればそのディレクトリ、
/// なければ ~/.docker を使用
pub fn docker_config_path() -> PathBuf {
    std::env::var("DOCKER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".docker"))
                .unwrap_or_else(|| PathBuf::from(".docker"))
        })
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn without_config_env<R>(f: impl FnOnce() -> R) -> R {
        temp_env::with_var_unset("SHIPFLOW_CONFIG_PATH", f)
    }

    #[test]
    #[serial]
    fn test_find_project_file_in_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("shipflow.yaml"), "images: []").unwrap();

        let result = without_config_env(|| find_project_file_in(temp_dir.path())).unwrap();
        assert!(result.ends_with("shipflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_project_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("shipflow.yaml"), "# global").unwrap();
        fs::write(temp_dir.path().join("shipflow.local.yaml"), "# local").unwrap();

        let result = without_config_env(|| find_project_file_in(temp_dir.path())).unwrap();

        // shipflow.local.yaml が優先される
        assert!(result.ends_with("shipflow.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_hidden_file_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join(".shipflow.local.yaml"), "# hidden local").unwrap();
        fs::write(temp_dir.path().join("shipflow.yaml"), "# visible").unwrap();

        let result = without_config_env(|| find_project_file_in(temp_dir.path())).unwrap();
        assert!(result.ends_with(".shipflow.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_project_file_in_shipflow_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let shipflow_dir = temp_dir.path().join(".shipflow");
        fs::create_dir(&shipflow_dir).unwrap();
        fs::write(shipflow_dir.join("shipflow.yaml"), "# in dir").unwrap();

        let result = without_config_env(|| find_project_file_in(temp_dir.path())).unwrap();
        assert!(result.ends_with(".shipflow/shipflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_project_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "# custom").unwrap();

        let result = temp_env::with_var("SHIPFLOW_CONFIG_PATH", Some(&config_path), || {
            find_project_file_in(temp_dir.path())
        })
        .unwrap();
        assert_eq!(result, config_path);
    }

    #[test]
    #[serial]
    fn test_env_var_pointing_nowhere_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("shipflow.yaml"), "# present").unwrap();

        let result = temp_env::with_var("SHIPFLOW_CONFIG_PATH", Some("/nonexistent/x.yaml"), || {
            find_project_file_in(temp_dir.path())
        });
        assert!(matches!(result, Err(ConfigError::ConfigPathMissing(_))));
    }

    #[test]
    #[serial]
    fn test_find_project_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fake_home = tempfile::tempdir().unwrap();

        // グローバル設定を拾わないよう XDG_CONFIG_HOME も空のディレクトリに向ける
        let result = temp_env::with_vars(
            [
                ("SHIPFLOW_CONFIG_PATH", None),
                ("XDG_CONFIG_HOME", Some(fake_home.path().as_os_str())),
            ],
            || find_project_file_in(temp_dir.path()),
        );

        if cfg!(target_os = "linux") {
            assert!(matches!(result, Err(ConfigError::ProjectFileNotFound)));
        }
    }

    #[test]
    #[serial]
    fn test_docker_config_path_env() {
        let path = temp_env::with_var("DOCKER_CONFIG", Some("/tmp/docker-cfg"), docker_config_path);
        assert_eq!(path, PathBuf::from("/tmp/docker-cfg/config.json"));
    }
}
