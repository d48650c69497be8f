//! SafeShare CLI
//!
//! 命令行客户端：上传文件获取取件码，或凭取件码下载文件

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use safeshare_core::DownloadBridge;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "safeshare", version, about = "SafeShare - 取件码文件分享")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 上传文件并获取取件码
    Upload {
        /// 要上传的文件路径
        file: PathBuf,
        /// 服务器地址
        #[arg(short, long, default_value = client::DEFAULT_SERVER)]
        server: String,
    },
    /// 通过 HTTP 下载桥取件
    Download {
        /// 取件码
        code: u16,
        /// 服务器地址
        #[arg(short, long, default_value = client::DEFAULT_SERVER)]
        server: String,
        /// 保存目录 (默认: ~/Downloads)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 直接连接取件码端口取件
    Fetch {
        /// 取件码
        code: u16,
        /// 文件服务器所在主机
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// 保存目录 (默认: ~/Downloads)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn output_dir(output: Option<PathBuf>) -> PathBuf {
    output.unwrap_or_else(|| dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Upload { file, server } => {
            println!("📤 上传文件: {}", file.display());
            let code = client::ApiClient::new(&server).upload(&file).await?;
            println!("✅ 取件码: {}", code);
        }
        Commands::Download {
            code,
            server,
            output,
        } => {
            let dir = output_dir(output);
            println!("📥 下载取件码 {} (保存到: {})", code, dir.display());
            let path = client::ApiClient::new(&server).download(code, &dir).await?;
            println!("✅ 已保存: {}", path.display());
        }
        Commands::Fetch { code, host, output } => {
            let dir = output_dir(output);
            println!("🔌 连接 {}:{} ...", host, code);
            let file = DownloadBridge::new(&host, std::env::temp_dir())
                .fetch(code)
                .await?;
            println!("   {} ({} bytes)", file.file_name, file.size);
            let path = file.persist(&dir).await?;
            println!("✅ 已保存: {}", path.display());
        }
    }

    Ok(())
}
