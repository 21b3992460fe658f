// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/web.rs - HTTP 仪表盘与 JSON 接口
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

pub mod page;

use std::sync::Arc;

use axum::{
  Json, Router,
  body::Bytes,
  extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
  http::StatusCode,
  response::{Html, IntoResponse, Response},
  routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::{
  model::Model,
  pipeline::{Analysis, AnalysisReport, DetectionPipeline, PipelineError},
};

use self::page::{Outcome, PageView};

/// 上传字段名
pub const IMAGE_FIELD: &str = "image";
/// multipart 边界与表头的余量
pub const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum WebError {
  #[error(transparent)]
  Pipeline(#[from] PipelineError),
  #[error("no image was uploaded, choose a JPEG or PNG file")]
  MissingImage,
  #[error("could not read upload: {0}")]
  Multipart(#[from] MultipartError),
  #[error("analysis task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
  #[error("could not encode annotated image: {0}")]
  Encode(#[from] image::ImageError),
}

impl WebError {
  pub fn status(&self) -> StatusCode {
    match self {
      WebError::Pipeline(PipelineError::ImageDecode(_)) => StatusCode::BAD_REQUEST,
      WebError::Pipeline(PipelineError::ImageTooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
      WebError::Pipeline(PipelineError::Inference(_)) => StatusCode::INTERNAL_SERVER_ERROR,
      WebError::MissingImage => StatusCode::BAD_REQUEST,
      WebError::Multipart(e) => e.status(),
      WebError::Join(_) | WebError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      WebError::Pipeline(e) => e.kind(),
      WebError::MissingImage => "missing_image",
      WebError::Multipart(_) => "multipart",
      WebError::Join(_) | WebError::Encode(_) => "internal",
    }
  }
}

type SharedPipeline<M> = Arc<DetectionPipeline<M>>;

struct Finished {
  analysis: Analysis,
  image_png_base64: String,
}

#[derive(Serialize)]
struct DetectResponse {
  #[serde(flatten)]
  report: AnalysisReport,
  image_png_base64: String,
}

pub fn router<M>(pipeline: SharedPipeline<M>) -> Router
where
  M: Model + Send + 'static,
{
  let body_limit = pipeline
    .settings()
    .limits
    .max_upload_bytes
    .saturating_add(MULTIPART_OVERHEAD);

  Router::new()
    .route("/", get(index::<M>).post(upload::<M>))
    .route("/api/detect", post(api_detect::<M>))
    .route("/healthz", get(healthz::<M>))
    .layer(DefaultBodyLimit::disable())
    .layer(RequestBodyLimitLayer::new(body_limit))
    .layer(TraceLayer::new_for_http())
    .with_state(pipeline)
}

fn page_view<'a, M: Model>(pipeline: &'a DetectionPipeline<M>, outcome: Outcome<'a>) -> PageView<'a> {
  let settings = pipeline.settings();
  PageView {
    target_label: &settings.target_label,
    model_name: pipeline.model_name(),
    confidence: settings.confidence,
    outcome,
  }
}

async fn index<M>(State(pipeline): State<SharedPipeline<M>>) -> Html<String>
where
  M: Model + Send + 'static,
{
  Html(page::render(&page_view(&pipeline, Outcome::Empty)))
}

async fn upload<M>(State(pipeline): State<SharedPipeline<M>>, multipart: Multipart) -> Response
where
  M: Model + Send + 'static,
{
  match process(pipeline.clone(), multipart).await {
    Ok(finished) => {
      let outcome = Outcome::Success {
        count: finished.analysis.count,
        status: finished.analysis.status,
        image_png_base64: &finished.image_png_base64,
        inference_ms: finished.analysis.elapsed.as_secs_f64() * 1000.0,
      };
      Html(page::render(&page_view(&pipeline, outcome))).into_response()
    }
    Err(e) => {
      warn!("请求处理失败: {}", e);
      let message = e.to_string();
      let outcome = Outcome::Failure { message: &message };
      (e.status(), Html(page::render(&page_view(&pipeline, outcome)))).into_response()
    }
  }
}

async fn api_detect<M>(State(pipeline): State<SharedPipeline<M>>, multipart: Multipart) -> Response
where
  M: Model + Send + 'static,
{
  match process(pipeline.clone(), multipart).await {
    Ok(finished) => Json(DetectResponse {
      report: finished.analysis.report(pipeline.settings()),
      image_png_base64: finished.image_png_base64,
    })
    .into_response(),
    Err(e) => {
      warn!("接口请求失败: {}", e);
      (
        e.status(),
        Json(json!({ "error": e.to_string(), "kind": e.kind() })),
      )
        .into_response()
    }
  }
}

async fn healthz<M>(State(pipeline): State<SharedPipeline<M>>) -> Json<serde_json::Value>
where
  M: Model + Send + 'static,
{
  Json(json!({ "status": "ok", "model": pipeline.model_name() }))
}

async fn process<M>(pipeline: SharedPipeline<M>, multipart: Multipart) -> Result<Finished, WebError>
where
  M: Model + Send + 'static,
{
  let bytes = read_image(multipart).await?;
  debug!("收到上传: {} 字节", bytes.len());

  tokio::task::spawn_blocking(move || -> Result<Finished, WebError> {
    let analysis = pipeline.analyze(&bytes)?;
    let png = analysis.encode_png()?;
    Ok(Finished {
      analysis,
      image_png_base64: STANDARD.encode(png),
    })
  })
  .await?
}

async fn read_image(mut multipart: Multipart) -> Result<Bytes, WebError> {
  while let Some(field) = multipart.next_field().await? {
    if field.name() != Some(IMAGE_FIELD) {
      continue;
    }
    // 浏览器未选择文件时仍会提交一个空的文件字段
    let bytes = field.bytes().await?;
    if bytes.is_empty() {
      return Err(WebError::MissingImage);
    }
    return Ok(bytes);
  }

  Err(WebError::MissingImage)
}
