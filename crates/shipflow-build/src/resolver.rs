use crate::error::{BuildError, BuildResult};
use shipflow_core::BuildSpec;
use std::collections::HashMap;
use std::path::PathBuf;

pub struct BuildResolver {
    project_root: PathBuf,
}

impl BuildResolver {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }

    /// Dockerfileのパスを解決
    ///
    /// 検索順序:
    /// 1. 明示的な指定（build.dockerfileフィールド、プロジェクトルートからの相対パス）
    /// 2. 規約ベース: {context}/Dockerfile
    pub fn resolve_dockerfile(&self, spec: &BuildSpec) -> BuildResult<PathBuf> {
        let path = match &spec.dockerfile {
            Some(dockerfile) => self.project_root.join(dockerfile),
            None => self.resolve_context(spec)?.join("Dockerfile"),
        };

        if path.is_file() {
            tracing::debug!("Using Dockerfile at: {}", path.display());
            Ok(path)
        } else {
            Err(BuildError::DockerfileNotFound(path))
        }
    }

    /// ビルドコンテキストのパスを解決
    ///
    /// デフォルトはプロジェクトルート
    pub fn resolve_context(&self, spec: &BuildSpec) -> BuildResult<PathBuf> {
        let context = match &spec.context {
            Some(ctx) => self.project_root.join(ctx),
            None => self.project_root.clone(),
        };

        // コンテキストディレクトリの存在確認
        if !context.exists() {
            return Err(BuildError::ContextNotFound(context));
        }

        if !context.is_dir() {
            return Err(BuildError::InvalidConfig(format!(
                "Build context is not a directory: {}",
                context.display()
            )));
        }

        Ok(context)
    }

    /// ビルド引数の変数展開
    pub fn resolve_build_args(
        &self,
        spec: &BuildSpec,
        variables: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        spec.args
            .iter()
            .map(|(key, value)| {
                self.validate_build_arg(key);
                // 変数展開: {VAR_NAME} → 実際の値
                (key.clone(), self.expand_variables(value, variables))
            })
            .collect()
    }

    /// 変数展開処理
    ///
    /// テンプレート文字列内の {VAR_NAME} を実際の値に置換
    fn expand_variables(&self, template: &str, variables: &HashMap<String, String>) -> String {
        let mut result = template.to_string();

        for (key, value) in variables {
            let placeholder = format!("{{{}}}", key);
            result = result.replace(&placeholder, value);
        }

        result
    }

    /// ビルド引数の検証（機密情報の警告）
    fn validate_build_arg(&self, key: &str) {
        let sensitive_patterns = ["password", "token", "secret", "api_key", "private_key"];

        let key_lower = key.to_lowercase();
        if sensitive_patterns.iter().any(|p| key_lower.contains(p)) {
            tracing::warn!(
                "警告: ビルド引数 '{}' は機密情報を含む可能性があります。\n\
                 ビルド引数はイメージ履歴に記録されます。\n\
                 機密情報はビルド引数ではなく、シークレットマウントを使用してください。",
                key
            );
        }
    }
}
