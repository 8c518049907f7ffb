//! Koala HTTP 服务
//!
//! 启动: cargo run --bin koala-server --features web
//! 配置了端点的能力走 HTTP 后端，未配置的用 mock 顶上（本地联调）。

#![cfg(feature = "web")]

use std::sync::Arc;

use anyhow::Context;
use koala::capability::CapabilityClient;
use koala::config::load_config;
use koala::coordinator::{Coordinator, SessionManager};
use koala::notify::{LogSink, NotificationScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    koala::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let bind_addr = cfg
        .app
        .bind_addr
        .clone()
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());

    let capabilities = CapabilityClient::from_config(&cfg.capability);
    let (coordinator, notify_rx) = Coordinator::new(cfg, capabilities);
    let coordinator = Arc::new(coordinator);

    let _delivery = NotificationScheduler::spawn_delivery(notify_rx, Arc::new(LogSink));
    let _sweeper = SessionManager::spawn_sweeper(coordinator.session_manager());

    let app = koala::api::router(coordinator);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    tracing::info!(%bind_addr, "koala server listening");
    axum::serve(listener, app).await.context("Server run failed")?;

    Ok(())
}
