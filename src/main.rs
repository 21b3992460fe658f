// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/main.rs - 货架检测仪表盘服务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shelfwatch::{
  args::Args,
  config::Config,
  model::{Model, Yolov8Builder},
  output::Draw,
  pipeline::DetectionPipeline,
  web,
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  let config = Config::load(&args.config)?;

  info!("模型来源: {}", config.model);
  let now = std::time::Instant::now();
  let mut builder = Yolov8Builder::from_source(&config.model)?;
  if let Some(labels) = config.label_set()? {
    builder = builder.labels(labels);
  }
  let model = builder
    .build()
    .with_context(|| format!("无法加载模型 {}", config.model))?;
  config.check_labels(model.labels())?;
  info!("模型加载完成，耗时: {:.2?}", now.elapsed());

  let pipeline = Arc::new(DetectionPipeline::new(model, Draw::new()?, config.settings.clone()));
  let app = web::router(pipeline);

  let listener = tokio::net::TcpListener::bind(config.bind)
    .await
    .with_context(|| format!("无法监听 {}", config.bind))?;
  info!("仪表盘已启动: http://{}", config.bind);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  info!("服务已停止");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!("无法监听退出信号: {}", e);
    std::future::pending::<()>().await;
  }
  info!("收到退出信号，正在停止服务...");
}
