// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/pipeline.rs - 检测流水线
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

//! 上传字节 → 解码 → 通道适配 → 模型推理 → 目标类别过滤 → 分级与标注

use std::{
  io::Cursor,
  sync::Mutex,
  time::{Duration, Instant},
};

use image::{ImageError, ImageFormat, ImageReader, Limits, RgbImage};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{ChannelOrder, NhwcFrame},
  model::{ClassLabel, DetectItem, DetectResult, Model, WithLabel},
  output::Draw,
  stock::{StockStatus, StockThresholds},
};

pub const DEFAULT_CONFIDENCE: f32 = 0.60;
pub const DEFAULT_TARGET_LABEL: &str = "sprite";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("could not decode image: {0}")]
  ImageDecode(String),
  #[error("image too large: {0}")]
  ImageTooLarge(String),
  #[error("inference failed: {0}")]
  Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PipelineError {
  pub fn kind(&self) -> &'static str {
    match self {
      PipelineError::ImageDecode(_) => "image_decode",
      PipelineError::ImageTooLarge(_) => "image_too_large",
      PipelineError::Inference(_) => "inference",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
  pub max_upload_bytes: usize,
  pub max_dimension: u32,
}

impl Default for UploadLimits {
  fn default() -> Self {
    Self {
      max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
      max_dimension: DEFAULT_MAX_DIMENSION,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
  pub confidence: f32,
  pub target_label: String,
  pub thresholds: StockThresholds,
  pub limits: UploadLimits,
}

impl Default for PipelineSettings {
  fn default() -> Self {
    Self {
      confidence: DEFAULT_CONFIDENCE,
      target_label: DEFAULT_TARGET_LABEL.to_string(),
      thresholds: StockThresholds::default(),
      limits: UploadLimits::default(),
    }
  }
}

/// 单次请求的分析结果
#[derive(Debug, Clone)]
pub struct Analysis {
  /// 模型的完整输出，仅供诊断
  pub raw: DetectResult<ClassLabel>,
  pub targets: DetectResult<ClassLabel>,
  pub count: usize,
  pub status: StockStatus,
  pub annotated: RgbImage,
  pub elapsed: Duration,
}

impl Analysis {
  pub fn encode_png(&self) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    self.annotated.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
  }

  pub fn report(&self, settings: &PipelineSettings) -> AnalysisReport {
    AnalysisReport {
      target_label: settings.target_label.clone(),
      confidence_threshold: settings.confidence,
      count: self.count,
      status: StatusReport::from(self.status),
      detections: self.targets.iter().map(DetectionReport::from).collect(),
      raw_detections: self.raw.iter().map(DetectionReport::from).collect(),
      image_width: self.annotated.width(),
      image_height: self.annotated.height(),
      inference_ms: self.elapsed.as_secs_f64() * 1000.0,
      analyzed_at: chrono::Utc::now().to_rfc3339(),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
  pub target_label: String,
  pub confidence_threshold: f32,
  pub count: usize,
  pub status: StatusReport,
  pub detections: Vec<DetectionReport>,
  pub raw_detections: Vec<DetectionReport>,
  pub image_width: u32,
  pub image_height: u32,
  pub inference_ms: f64,
  pub analyzed_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
  pub code: StockStatus,
  pub label: &'static str,
  pub icon: &'static str,
  pub tone: &'static str,
  pub message: &'static str,
}

impl From<StockStatus> for StatusReport {
  fn from(status: StockStatus) -> Self {
    Self {
      code: status,
      label: status.label(),
      icon: status.icon(),
      tone: status.tone(),
      message: status.message(),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
  pub label: String,
  pub class_id: u32,
  pub confidence: f32,
  pub bbox: [f32; 4],
}

impl<T: WithLabel> From<&DetectItem<T>> for DetectionReport {
  fn from(item: &DetectItem<T>) -> Self {
    Self {
      label: item.kind.to_label_str(),
      class_id: item.kind.to_label_id(),
      confidence: item.score,
      bbox: item.bbox,
    }
  }
}

/// 检测流水线，模型通过构造函数注入
///
/// 模型访问经由互斥锁串行化，流水线本身可以在多个请求间共享。
pub struct DetectionPipeline<M> {
  model: Mutex<M>,
  model_name: String,
  order: ChannelOrder,
  draw: Draw,
  settings: PipelineSettings,
}

impl<M: Model> DetectionPipeline<M> {
  pub fn new(model: M, draw: Draw, settings: PipelineSettings) -> Self {
    if !model.labels().contains(&settings.target_label) {
      warn!("目标类别 {} 不在模型的类别表中", settings.target_label);
    }

    Self {
      model_name: model.name().to_string(),
      order: model.channel_order(),
      model: Mutex::new(model),
      draw,
      settings,
    }
  }

  pub fn settings(&self) -> &PipelineSettings {
    &self.settings
  }

  pub fn model_name(&self) -> &str {
    &self.model_name
  }

  /// 解码 JPEG 或 PNG 上传，统一转换为 RGB
  pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    let limits = &self.settings.limits;
    if bytes.is_empty() {
      return Err(PipelineError::ImageDecode("empty upload".to_string()));
    }
    if bytes.len() > limits.max_upload_bytes {
      return Err(PipelineError::ImageTooLarge(format!(
        "{} bytes exceeds the {} byte limit",
        bytes.len(),
        limits.max_upload_bytes
      )));
    }

    let mut reader = ImageReader::new(Cursor::new(bytes))
      .with_guessed_format()
      .map_err(|e| PipelineError::ImageDecode(e.to_string()))?;

    match reader.format() {
      Some(ImageFormat::Png) | Some(ImageFormat::Jpeg) => {}
      Some(other) => {
        return Err(PipelineError::ImageDecode(format!(
          "unsupported format {:?}, upload a JPEG or PNG",
          other
        )));
      }
      None => {
        return Err(PipelineError::ImageDecode(
          "unrecognized image data".to_string(),
        ));
      }
    }

    let mut decode_limits = Limits::default();
    decode_limits.max_image_width = Some(limits.max_dimension);
    decode_limits.max_image_height = Some(limits.max_dimension);
    reader.limits(decode_limits);

    let image = reader
      .decode()
      .map_err(|e| decode_error(e, limits.max_dimension))?;

    debug!("图像解码完成: {}x{}", image.width(), image.height());
    Ok(image.to_rgb8())
  }

  /// 调用一次模型，返回未经类别过滤的结果
  pub fn detect(
    &self,
    image: &RgbImage,
    confidence: f32,
  ) -> Result<DetectResult<ClassLabel>, PipelineError> {
    let frame = NhwcFrame::from_rgb_image(image, self.order);
    // 推理只读取模型，上一次请求崩溃留下的锁可以继续使用
    let model = self.model.lock().unwrap_or_else(|poisoned| {
      warn!("模型锁在上一次推理中被污染，继续使用");
      poisoned.into_inner()
    });

    model.infer(&frame, confidence).map_err(|e| {
      error!("模型推理失败: {}", e);
      PipelineError::Inference(Box::new(e))
    })
  }

  pub fn analyze(&self, bytes: &[u8]) -> Result<Analysis, PipelineError> {
    let image = self.decode(bytes)?;

    let now = Instant::now();
    let raw = self.detect(&image, self.settings.confidence)?;
    let elapsed = now.elapsed();

    let target = &self.settings.target_label;
    let targets = raw.filter_label(target);
    let count = raw.count_label(target);
    let status = self.settings.thresholds.classify(count);
    info!(
      "推理完成，耗时: {:.2?}, 检测到 {} 个物体, 其中 {} 个 {}, 状态 {}",
      elapsed,
      raw.len(),
      count,
      target,
      status.label()
    );

    let annotated = self.draw.annotate(&image, &raw, target);

    Ok(Analysis {
      raw,
      targets,
      count,
      status,
      annotated,
      elapsed,
    })
  }
}

fn decode_error(e: ImageError, max_dimension: u32) -> PipelineError {
  match e {
    ImageError::Limits(limit) => PipelineError::ImageTooLarge(format!(
      "{} (each side may be at most {} pixels)",
      limit, max_dimension
    )),
    other => PipelineError::ImageDecode(other.to_string()),
  }
}
