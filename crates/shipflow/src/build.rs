use crate::utils;
use colored::Colorize;
use shipflow_build::{
    BatchDriver, BatchMode, BatchReport, BuildOrchestrator, BuildParams, CancelToken,
    ContextParams, CredentialResolver, DaemonTimeouts, DockerDaemon, FailurePolicy,
    PushOrchestrator, TarArchiveService,
};
use std::collections::HashMap;
use std::sync::Arc;

/// build / push コマンドのオプション
pub struct BatchOptions {
    pub image: Option<String>,
    pub registry: Option<String>,
    pub keep_going: bool,
    pub jobs: usize,
    pub strict_auth: bool,
    pub timeouts: DaemonTimeouts,
    pub no_cache: bool,
    pub build_args: HashMap<String, String>,
}

/// build / push コマンドを処理
pub async fn handle_batch_command(mode: BatchMode, options: BatchOptions) -> anyhow::Result<()> {
    let config_path = shipflow_config::find_project_file()?;
    tracing::debug!("Using project file: {}", config_path.display());

    let project = shipflow_core::load_project_file(&config_path)?;
    let images = project.select(options.image.as_deref())?;

    if images.is_empty() {
        println!("{}", "対象のイメージがありません".yellow());
        return Ok(());
    }

    println!(
        "{} {} 個のイメージを処理します ({})",
        "→".blue(),
        images.len(),
        utils::mode_label(mode)
    );

    // Docker接続
    let daemon = Arc::new(
        DockerDaemon::connect()
            .map_err(|e| anyhow::anyhow!(e.user_message()))?
            .with_timeouts(options.timeouts),
    );
    daemon
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let credentials =
        Arc::new(CredentialResolver::new(project.auth.clone()).strict(options.strict_auth));
    let builder = BuildOrchestrator::new(daemon.clone(), Arc::new(TarArchiveService::new()));
    let pusher =
        PushOrchestrator::new(daemon, credentials).with_global_registry(project.registry.clone());

    let policy = if options.keep_going {
        FailurePolicy::Continue
    } else {
        FailurePolicy::FailFast
    };

    let cancel = CancelToken::new();
    let driver = BatchDriver::new(builder, pusher)
        .with_policy(policy)
        .with_concurrency(options.jobs)
        .with_registry_override(options.registry)
        .with_cancel_token(cancel.clone());

    // Ctrl-C で新しいイメージの開始を止める
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{}",
                "中断要求を受け付けました。実行中のイメージの完了を待っています...".yellow()
            );
            cancel.cancel();
        }
    });

    let params = BuildParams {
        no_cache: options.no_cache,
        build_args: options.build_args,
        variables: std::env::vars().collect(),
        context: ContextParams::new(&project.root),
    };

    let report = driver.run(&images, mode, &params).await;
    print_summary(&report);

    if !report.is_success() {
        for failure in report.failures() {
            if let Some(err) = &failure.error {
                eprintln!("\n{} {}", "✗".red(), err.user_message());
            }
        }
        anyhow::bail!(
            "{} 個のイメージが失敗しました",
            report.failures().count().max(1)
        );
    }

    Ok(())
}

/// 結果のサマリーを表示
fn print_summary(report: &BatchReport) {
    println!();
    println!("{}", "結果:".bold());
    for image in &report.images {
        println!("  {}", utils::describe_report(image));
    }
}
