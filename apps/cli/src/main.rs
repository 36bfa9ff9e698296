use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use agrisaathi_core_sdk::prelude::*;

/**
 * \brief AgriSaathi 命令行：启动 API 服务或单次运行流水线。
 */
#[derive(Parser, Debug)]
#[command(name = "agrisaathi", version, about = "AgriSaathi farmer assistant backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 启动 HTTP API。
     * \param addr 监听地址，默认 0.0.0.0:$PORT
     */
    Serve {
        #[arg(long)]
        addr: Option<String>,
    },

    /** \brief 向聊天助手提问一次并打印入库的回复。 */
    Chat {
        #[arg(long)]
        text: String,
    },

    /**
     * \brief 诊断一张叶片图片并打印入库记录。
     * \details 图片先复制到暂存目录，原文件保持不变。
     */
    Diagnose {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        role: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing();

    let config = Config::from_env().context("load configuration failed")?;
    telemetry::set_enabled(config.telemetry_enabled);
    let port = config.port;
    let upload_dir = config.upload_dir.clone();
    let state = AppState::from_config(config).context("initialize services failed")?;
    tracing::debug!(upload_dir = %upload_dir.display(), "services initialized");

    match cli.command {
        Commands::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| format!("0.0.0.0:{}", port));
            tracing::info!(%addr, "starting api server");
            server::run(state, &addr).await?;
        }
        Commands::Chat { text } => {
            let text = text.trim();
            if text.is_empty() {
                anyhow::bail!("--text must not be empty");
            }
            let record = state.chat.run(text).await.context("chat failed")?;
            tracing::info!(id = record.id, "chat reply stored");
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Diagnose { image, role } => {
            let file_name = image
                .file_name()
                .and_then(|n| n.to_str())
                .context("image path has no file name")?;
            let staged_path = upload_dir.join(format!("{}-{}", db::now_millis(), file_name));
            tokio::fs::copy(&image, &staged_path)
                .await
                .with_context(|| format!("copy {} failed", image.display()))?;
            tracing::info!(staged = %staged_path.display(), "image staged for diagnosis");

            let record = state
                .diagnosis
                .run(StagedFile::new(staged_path), role.as_deref())
                .await
                .context("diagnosis failed")?;
            tracing::info!(id = record.id, disease = ?record.disease, "diagnosis stored");
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    Ok(())
}
