mod build;
mod utils;

use clap::{Args, Parser, Subcommand};
use shipflow_build::BatchMode;

#[derive(Parser)]
#[command(name = "ship")]
#[command(about = "shipflow.yaml に定義したイメージをビルドしてレジストリへ届ける", long_about = None)]
struct Cli {
    /// 詳細なログを出力
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// イメージをビルド
    Build {
        /// ビルド後にレジストリへプッシュ
        #[arg(long)]
        push: bool,
        /// キャッシュを使わずにビルド
        #[arg(long)]
        no_cache: bool,
        /// ビルド引数（KEY=VALUE、複数指定可）
        #[arg(long = "build-arg", value_name = "KEY=VALUE", value_parser = utils::parse_build_arg)]
        build_args: Vec<(String, String)>,
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// ビルド済みイメージをプッシュ
    Push {
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// パスワードを暗号化して shipflow.yaml に記述できる形式で出力
    EncryptPassword {
        /// 暗号化するパスワード（省略時は標準入力から1行読み込み）
        password: Option<String>,
        /// マスターキーを新規生成して表示
        #[arg(long, conflicts_with = "password")]
        generate_key: bool,
    },
    /// バージョン情報を表示
    Version,
}

/// build / push に共通のオプション
#[derive(Args)]
struct BatchArgs {
    /// 対象イメージ（名前またはエイリアス、カンマ区切り）
    #[arg(short, long)]
    image: Option<String>,
    /// プッシュ先レジストリ（設定より優先）
    #[arg(short, long, env = "SHIPFLOW_REGISTRY")]
    registry: Option<String>,
    /// 失敗したイメージがあっても残りを続行
    #[arg(short = 'k', long)]
    keep_going: bool,
    /// 同時に処理するイメージ数
    #[arg(short, long, default_value = "1")]
    jobs: usize,
    /// 認証情報が見つからない場合はエラーにする
    #[arg(long)]
    strict_auth: bool,
    /// 1イメージのビルドのタイムアウト（秒）
    #[arg(long, value_name = "SECONDS", env = "SHIPFLOW_BUILD_TIMEOUT")]
    build_timeout: Option<u64>,
    /// 1参照のプッシュのタイムアウト（秒）
    #[arg(long, value_name = "SECONDS", env = "SHIPFLOW_PUSH_TIMEOUT")]
    push_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    utils::init_tracing(cli.verbose);

    match cli.command {
        Commands::Version => {
            println!("shipflow {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::EncryptPassword {
            password,
            generate_key,
        } => {
            utils::handle_encrypt_password(password, generate_key)?;
        }
        Commands::Build {
            push,
            no_cache,
            build_args,
            batch,
        } => {
            let mode = if push {
                BatchMode::BuildAndPush
            } else {
                BatchMode::Build
            };
            build::handle_batch_command(mode, batch.into_options(no_cache, build_args)).await?;
        }
        Commands::Push { batch } => {
            build::handle_batch_command(BatchMode::Push, batch.into_options(false, Vec::new()))
                .await?;
        }
    }

    Ok(())
}

impl BatchArgs {
    fn into_options(self, no_cache: bool, build_args: Vec<(String, String)>) -> build::BatchOptions {
        build::BatchOptions {
            image: self.image,
            registry: self.registry,
            keep_going: self.keep_going,
            jobs: self.jobs,
            strict_auth: self.strict_auth,
            timeouts: utils::daemon_timeouts(self.build_timeout, self.push_timeout),
            no_cache,
            build_args: build_args.into_iter().collect(),
        }
    }
}
