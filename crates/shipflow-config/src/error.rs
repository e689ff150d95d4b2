use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: shipflow.local.yaml, .shipflow.local.yaml, shipflow.yaml, .shipflow.yaml\n\
        - ./.shipflow/ ディレクトリ\n\
        - ~/.config/shipflow/shipflow.yaml\n\
        または SHIPFLOW_CONFIG_PATH 環境変数で直接指定できます"
    )]
    ProjectFileNotFound,

    #[error("SHIPFLOW_CONFIG_PATH が存在しないファイルを指しています: {0}")]
    ConfigPathMissing(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}
