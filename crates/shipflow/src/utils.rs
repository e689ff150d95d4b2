use colored::Colorize;
use shipflow_build::{
    BatchMode, BuildOutcome, CleanupOutcome, DaemonTimeouts, ImageReport, ImageStatus,
    MASTER_KEY_ENV, PushOutcome, decode_master_key, encrypt_password, generate_master_key,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// ログの初期化（RUST_LOG があればそちらを優先）
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// `--build-arg KEY=VALUE` のパース
pub fn parse_build_arg(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("KEY=VALUE 形式で指定してください: {}", raw)),
    }
}

/// CLI で指定されたタイムアウト（秒）を既定値に重ねる
pub fn daemon_timeouts(build_secs: Option<u64>, push_secs: Option<u64>) -> DaemonTimeouts {
    let defaults = DaemonTimeouts::default();
    DaemonTimeouts {
        build: build_secs.map_or(defaults.build, Duration::from_secs),
        push: push_secs.map_or(defaults.push, Duration::from_secs),
        ..defaults
    }
}

pub fn mode_label(mode: BatchMode) -> &'static str {
    match mode {
        BatchMode::Build => "build",
        BatchMode::Push => "push",
        BatchMode::BuildAndPush => "build + push",
    }
}

/// サマリー1行分の表示
pub fn describe_report(report: &ImageReport) -> String {
    match report.status {
        ImageStatus::Succeeded => {
            let mut parts = Vec::new();
            if let Some(BuildOutcome::Built { cleanup, .. }) = &report.build {
                parts.push("built".to_string());
                match cleanup {
                    CleanupOutcome::Removed(id) => parts.push(format!("removed {}", short_id(id))),
                    CleanupOutcome::Failed { id, .. } => {
                        parts.push(format!("old image {} kept", short_id(id)))
                    }
                    CleanupOutcome::NotRequested | CleanupOutcome::NothingToRemove => {}
                }
            }
            if let Some(PushOutcome::Pushed { names, .. }) = &report.push {
                parts.push(format!("pushed {} ref(s)", names.len()));
            }
            format!("{} {} {}", "✓".green(), report.image.cyan(), parts.join(", "))
        }
        ImageStatus::Skipped => format!(
            "{} {} {}",
            "-".dimmed(),
            report.image,
            "(no build configuration)".dimmed()
        ),
        ImageStatus::Failed => {
            let reason = report
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            format!("{} {} {}", "✗".red(), report.image.red(), reason)
        }
        ImageStatus::NotStarted => format!(
            "{} {} {}",
            "·".dimmed(),
            report.image,
            "(not started)".dimmed()
        ),
    }
}

/// `sha256:` を除いた先頭12文字
fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.get(..12).unwrap_or(id)
}

/// encrypt-password コマンドを処理
pub fn handle_encrypt_password(password: Option<String>, generate_key: bool) -> anyhow::Result<()> {
    if generate_key {
        println!("{}", generate_master_key());
        eprintln!(
            "{} {} に設定してください",
            "ℹ".blue(),
            MASTER_KEY_ENV
        );
        return Ok(());
    }

    let raw_key = std::env::var(MASTER_KEY_ENV).map_err(|_| {
        anyhow::anyhow!(
            "{} が設定されていません（`ship encrypt-password --generate-key` で生成できます）",
            MASTER_KEY_ENV
        )
    })?;
    let key = decode_master_key(&raw_key).map_err(anyhow::Error::msg)?;

    let password = match password {
        Some(password) => password,
        None => {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        anyhow::bail!("パスワードが空です");
    }

    println!("{}", encrypt_password(&password, &key).map_err(anyhow::Error::msg)?);
    Ok(())
}
