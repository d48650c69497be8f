//! Core Service - HTTP API 与取件码生命周期

use anyhow::Result;
use safeshare_core::{ApiServer, CodeEvent, CodeState, ServerConfig};
use tokio::sync::broadcast::error::RecvError;

pub async fn run_service(config: ServerConfig) -> Result<()> {
    let server = ApiServer::bind(&config).await?;
    let addr = server.local_addr()?;

    tracing::info!("API 服务器已启动: http://{}", addr);
    tracing::info!(
        "取件码范围 {}..={}，暂存目录 {:?}",
        config.code_min,
        config.code_max,
        config.staging_dir
    );

    // 记录取件码状态变化
    let mut events = server.sharer().registry().subscribe();
    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CodeEvent {
                    code,
                    state: CodeState::Failed(reason),
                }) => tracing::warn!("取件码 {} 失败: {}", code, reason),
                Ok(event) => tracing::debug!("取件码 {} -> {:?}", event.code, event.state),
                Err(RecvError::Lagged(n)) => tracing::debug!("跳过 {} 条状态事件", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("无法监听 Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("正在关闭服务...");
        })
        .await?;

    watcher.abort();
    Ok(())
}
