// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// tests/dashboard.rs - HTTP 仪表盘与接口测试
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

use std::{
  io::Cursor,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

use shelfwatch::{
  frame::{ChannelOrder, NhwcFrame},
  model::{ClassLabel, DetectItem, DetectResult, LabelSet, Model},
  output::Draw,
  pipeline::{DetectionPipeline, PipelineSettings, UploadLimits},
  web,
};

const BOUNDARY: &str = "shelfwatch-test-boundary";

#[derive(Debug, thiserror::Error)]
#[error("runtime exploded")]
struct MockError;

/// 返回固定检测结果的模型，记录调用次数
struct MockModel {
  labels: LabelSet,
  detections: Vec<(&'static str, f32, [f32; 4])>,
  fail: bool,
  calls: Arc<AtomicUsize>,
}

impl Model for MockModel {
  type Error = MockError;

  fn name(&self) -> &str {
    "mock-shelf"
  }

  fn channel_order(&self) -> ChannelOrder {
    ChannelOrder::Bgr
  }

  fn labels(&self) -> &LabelSet {
    &self.labels
  }

  fn infer(&self, _input: &NhwcFrame, confidence: f32) -> Result<DetectResult<ClassLabel>, MockError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(MockError);
    }

    let items: Vec<_> = self
      .detections
      .iter()
      .filter(|(_, score, _)| *score >= confidence)
      .map(|(name, score, bbox)| DetectItem {
        kind: self.labels.find(name).unwrap(),
        score: *score,
        bbox: *bbox,
      })
      .collect();
    Ok(items.into())
  }
}

fn shelf_detections() -> Vec<(&'static str, f32, [f32; 4])> {
  vec![
    ("sprite", 0.93, [20.0, 40.0, 70.0, 180.0]),
    ("coke", 0.88, [80.0, 40.0, 130.0, 180.0]),
    ("sprite", 0.81, [140.0, 40.0, 190.0, 180.0]),
    ("sprite", 0.66, [200.0, 40.0, 250.0, 180.0]),
    ("sprite", 0.42, [260.0, 40.0, 310.0, 180.0]),
  ]
}

fn app_with(
  detections: Vec<(&'static str, f32, [f32; 4])>,
  fail: bool,
  settings: PipelineSettings,
) -> (Router, Arc<AtomicUsize>) {
  let calls = Arc::new(AtomicUsize::new(0));
  let model = MockModel {
    labels: LabelSet::from_names(["sprite", "coke"]).unwrap(),
    detections,
    fail,
    calls: calls.clone(),
  };
  let pipeline = DetectionPipeline::new(model, Draw::new().unwrap(), settings);
  (web::router(Arc::new(pipeline)), calls)
}

fn app() -> (Router, Arc<AtomicUsize>) {
  app_with(shelf_detections(), false, PipelineSettings::default())
}

fn shelf_png(width: u32, height: u32) -> Vec<u8> {
  let image = RgbImage::from_fn(width, height, |x, y| {
    Rgb([(x % 200) as u8 + 30, (y % 200) as u8 + 30, 90])
  });
  let mut buffer = Cursor::new(Vec::new());
  image.write_to(&mut buffer, ImageFormat::Png).unwrap();
  buffer.into_inner()
}

fn multipart_request(uri: &str, field: &str, bytes: &[u8]) -> Request<Body> {
  let mut body = Vec::new();
  body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
  body.extend_from_slice(
    format!(
      "Content-Disposition: form-data; name=\"{}\"; filename=\"shelf.png\"\r\n",
      field
    )
    .as_bytes(),
  );
  body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
  body.extend_from_slice(bytes);
  body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

  Request::builder()
    .method("POST")
    .uri(uri)
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={}", BOUNDARY),
    )
    .body(Body::from(body))
    .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
  let body = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  String::from_utf8(body.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
  let body = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_index_shows_empty_state() {
  let (app, calls) = app();

  let response = app
    .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let html = body_text(response).await;
  assert!(html.contains("Sprite Detection Dashboard"));
  assert!(html.contains(r#"accept=".jpg,.jpeg,.png""#));
  assert!(html.contains(r#"class="placeholder""#));
  assert!(!html.contains("bottles detected"));
  assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upload_with_three_sprites_is_low_stock() {
  let (app, calls) = app();

  let response = app
    .oneshot(multipart_request("/", "image", &shelf_png(320, 200)))
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let html = body_text(response).await;
  assert!(html.contains("Sprite bottles detected: 3"));
  assert!(html.contains("LOW STOCK"));
  assert!(html.contains("⚠"));
  assert!(html.contains("#f29900"));
  assert!(html.contains("Stock is below recommended threshold"));
  assert!(html.contains("data:image/png;base64,"));
  assert!(html.contains("Sprite Detections"));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_corrupt_upload_renders_error_without_inference() {
  let (app, calls) = app();

  let response = app
    .oneshot(multipart_request("/", "image", b"this is not an image"))
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  let html = body_text(response).await;
  assert!(html.contains(r#"class="notice""#));
  assert!(!html.contains("bottles detected"));
  assert!(!html.contains("data:image/png"));
  assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_api_detect_reports_counts_and_image() {
  let (app, _) = app();

  let response = app
    .oneshot(multipart_request("/api/detect", "image", &shelf_png(320, 200)))
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let json = body_json(response).await;
  assert_eq!(json["count"], 3);
  assert_eq!(json["target_label"], "sprite");
  assert_eq!(json["status"]["code"], "LOW_STOCK");
  assert_eq!(json["status"]["label"], "LOW STOCK");
  assert_eq!(json["status"]["icon"], "⚠");
  assert_eq!(json["status"]["tone"], "warning");
  assert_eq!(
    json["status"]["message"],
    "Stock is below recommended threshold"
  );

  let detections = json["detections"].as_array().unwrap();
  assert_eq!(detections.len(), 3);
  assert!(detections.iter().all(|d| d["label"] == "sprite"));
  // 非目标类别只出现在原始结果中
  assert_eq!(json["raw_detections"].as_array().unwrap().len(), 4);

  let png = STANDARD
    .decode(json["image_png_base64"].as_str().unwrap())
    .unwrap();
  let annotated = image::load_from_memory(&png).unwrap();
  assert_eq!((annotated.width(), annotated.height()), (320, 200));
}

#[tokio::test]
async fn test_api_detect_rejects_corrupt_upload() {
  let (app, calls) = app();

  let response = app
    .oneshot(multipart_request("/api/detect", "image", b"\x89PNG\r\n\x1a\ntruncated"))
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  let json = body_json(response).await;
  assert_eq!(json["kind"], "image_decode");
  assert!(json["error"].as_str().is_some());
  assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_api_detect_requires_image_field() {
  let (app, calls) = app();

  let response = app
    .oneshot(multipart_request("/api/detect", "photo", &shelf_png(16, 16)))
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  let json = body_json(response).await;
  assert_eq!(json["kind"], "missing_image");
  assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_api_detect_rejects_oversized_image() {
  let settings = PipelineSettings {
    limits: UploadLimits {
      max_dimension: 64,
      ..UploadLimits::default()
    },
    ..PipelineSettings::default()
  };
  let (app, calls) = app_with(shelf_detections(), false, settings);

  let response = app
    .oneshot(multipart_request("/api/detect", "image", &shelf_png(128, 32)))
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
  let json = body_json(response).await;
  assert_eq!(json["kind"], "image_too_large");
  assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inference_failure_is_server_error() {
  let (app, calls) = app_with(shelf_detections(), true, PipelineSettings::default());

  let response = app
    .clone()
    .oneshot(multipart_request("/api/detect", "image", &shelf_png(64, 64)))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
  let json = body_json(response).await;
  assert_eq!(json["kind"], "inference");

  let response = app
    .oneshot(multipart_request("/", "image", &shelf_png(64, 64)))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
  let html = body_text(response).await;
  assert!(html.contains("runtime exploded"));
  assert!(!html.contains("data:image/png"));

  assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_shelf_is_critical() {
  let (app, _) = app_with(vec![("coke", 0.9, [10.0, 10.0, 40.0, 40.0])], false, PipelineSettings::default());

  let response = app
    .oneshot(multipart_request("/", "image", &shelf_png(64, 64)))
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let html = body_text(response).await;
  assert!(html.contains("Sprite bottles detected: 0"));
  assert!(html.contains("CRITICAL"));
  assert!(html.contains("✕"));
  assert!(html.contains("Stock critically low, restock immediately"));
}

#[tokio::test]
async fn test_healthz_names_the_model() {
  let (app, _) = app();

  let response = app
    .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let json = body_json(response).await;
  assert_eq!(json["status"], "ok");
  assert_eq!(json["model"], "mock-shelf");
}
