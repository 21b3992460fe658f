// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 模型
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

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage, imageops};
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, ChannelOrder, NhwcFrame},
  model::{ClassLabel, DetectItem, DetectResult, LabelSet, Model},
};

const YOLOV8_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLOV8_DEFAULT_NMS_THRESHOLD: f32 = 0.7;
const YOLOV8_BOX_ROWS: usize = 4;
const YOLOV8_PAD_VALUE: u8 = 114;
const YOLOV8_NAMES_KEY: &str = "names";

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, TractError),
  #[error("类别标签错误: {0}")]
  Labels(String),
  #[error("推理错误: {0}")]
  Inference(TractError),
  #[error("模型输出形状不符: {0}")]
  OutputShape(String),
  #[error("输入帧无效: {0}")]
  Frame(String),
}

impl Yolov8Error {
  pub fn invalid(msg: &str, e: TractError) -> Self {
    Yolov8Error::ModelInvalid(msg.to_string(), e)
  }
}

/// Ultralytics 导出的 YOLOv8 ONNX 模型，输出形状 `[1, 4 + 类别数, 候选数]`
pub struct Yolov8 {
  plan: Plan,
  labels: LabelSet,
  input_size: u32,
  order: ChannelOrder,
  nms_threshold: f32,
}

pub struct Yolov8Builder {
  model_path: PathBuf,
  input_size: u32,
  order: ChannelOrder,
  nms_threshold: f32,
  labels: Option<LabelSet>,
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = "yolov8";
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  /// `yolov8:///models/best.onnx?size=640&order=rgb&nms=0.7`，相对路径写作 `yolov8:best.onnx`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    if url.path().is_empty() {
      return Err(Yolov8Error::ModelPathError("模型路径为空".to_string()));
    }

    let mut builder = Yolov8Builder::new(url.path());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "size" => {
          builder.input_size = value
            .parse()
            .map_err(|_| Yolov8Error::ModelPathError(format!("无效的输入尺寸: {}", value)))?;
        }
        "order" => {
          builder.order = value.parse().map_err(Yolov8Error::ModelPathError)?;
        }
        "nms" => {
          builder.nms_threshold = value
            .parse()
            .map_err(|_| Yolov8Error::ModelPathError(format!("无效的 NMS 阈值: {}", value)))?;
        }
        other => debug!("忽略未知的模型参数: {}", other),
      }
    }

    Ok(builder)
  }
}

impl Yolov8Builder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Yolov8Builder {
      model_path: model_path.as_ref().to_path_buf(),
      input_size: YOLOV8_DEFAULT_INPUT_SIZE,
      order: ChannelOrder::Rgb,
      nms_threshold: YOLOV8_DEFAULT_NMS_THRESHOLD,
      labels: None,
    }
  }

  /// 接受 `yolov8:` URL 或者普通文件路径
  pub fn from_source(source: &str) -> Result<Self, Yolov8Error> {
    match Url::parse(source) {
      Ok(url) if url.scheme() == Self::SCHEME => Self::from_url(&url),
      _ => Ok(Self::new(source)),
    }
  }

  pub fn input_size(mut self, size: u32) -> Self {
    self.input_size = size;
    self
  }

  pub fn channel_order(mut self, order: ChannelOrder) -> Self {
    self.order = order;
    self
  }

  pub fn nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn labels(mut self, labels: LabelSet) -> Self {
    self.labels = Some(labels);
    self
  }

  /// 未提供类别表时从模型元数据 `names` 读取，并在加载时核对输出形状
  pub fn build(self) -> Result<Yolov8, Yolov8Error> {
    if self.input_size == 0 || self.input_size % 32 != 0 {
      return Err(Yolov8Error::ModelPathError(format!(
        "输入尺寸必须是 32 的正整数倍, 实际为 {}",
        self.input_size
      )));
    }

    if !(0.0..=1.0).contains(&self.nms_threshold) {
      return Err(Yolov8Error::ModelPathError(format!(
        "NMS 阈值必须在 0 到 1 之间, 实际为 {}",
        self.nms_threshold
      )));
    }

    if !self.model_path.is_file() {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型文件不存在: {}",
        self.model_path.display()
      )));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let onnx = tract_onnx::onnx();
    let proto = onnx
      .proto_model_for_path(&self.model_path)
      .map_err(|e| Yolov8Error::invalid("无法读取 ONNX 模型", e))?;

    let labels = match self.labels {
      Some(labels) => labels,
      None => {
        let names = proto
          .metadata_props
          .iter()
          .find(|prop| prop.key == YOLOV8_NAMES_KEY)
          .and_then(|prop| parse_names_metadata(&prop.value))
          .ok_or_else(|| {
            Yolov8Error::Labels("模型元数据中没有可用的类别表, 请配置类别文件".to_string())
          })?;
        info!("从模型元数据读取 {} 个类别", names.len());
        LabelSet::from_names(names).map_err(|e| Yolov8Error::Labels(e.to_string()))?
      }
    };

    let size = self.input_size as usize;
    let model = onnx
      .model_for_proto_model(&proto)
      .map_err(|e| Yolov8Error::invalid("无法解析 ONNX 模型", e))?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
      )
      .map_err(|e| Yolov8Error::invalid("无法设置模型输入", e))?
      .into_optimized()
      .map_err(|e| Yolov8Error::invalid("无法优化模型", e))?;

    let output = model
      .output_fact(0)
      .map_err(|e| Yolov8Error::invalid("无法读取模型输出", e))?;
    match output.shape.as_concrete() {
      Some(shape) => check_output_shape(shape, labels.len())?,
      None => debug!("模型输出形状不固定, 跳过类别数量检查"),
    }

    let plan = model
      .into_runnable()
      .map_err(|e| Yolov8Error::invalid("无法构建推理计划", e))?;
    info!("模型加载完成");

    debug!("模型输入尺寸: {}x{}", size, size);
    debug!("模型通道顺序: {}", self.order);
    debug!("模型类别数量: {}", labels.len());

    Ok(Yolov8 {
      plan,
      labels,
      input_size: self.input_size,
      order: self.order,
      nms_threshold: self.nms_threshold,
    })
  }
}

/// 输出必须是 `[1, 4 + nc, n]` 或 `[1, n, 4 + nc]`
fn check_output_shape(shape: &[usize], classes: usize) -> Result<(), Yolov8Error> {
  let rows = YOLOV8_BOX_ROWS + classes;
  match shape {
    [1, r, _] if *r == rows => Ok(()),
    [1, _, r] if *r == rows => Ok(()),
    _ => Err(Yolov8Error::Labels(format!(
      "模型输出形状 {:?} 与 {} 个类别不符",
      shape, classes
    ))),
  }
}

/// 解析 Ultralytics 导出写入的 `{0: 'sprite', 1: 'coke'}`
fn parse_names_metadata(value: &str) -> Option<Vec<String>> {
  let body = value.trim().strip_prefix('{')?.strip_suffix('}')?;
  let mut names: Vec<(usize, String)> = Vec::new();
  let mut rest = body.trim();

  while !rest.is_empty() {
    let (id, tail) = rest.split_once(':')?;
    let id: usize = id.trim().parse().ok()?;
    let tail = tail.trim_start();
    let quote = tail.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let tail = &tail[1..];
    let end = tail.find(quote)?;
    names.push((id, tail[..end].to_string()));
    rest = tail[end + 1..].trim_start();
    rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
  }

  names.sort_by_key(|(id, _)| *id);
  if names.is_empty() || names.iter().enumerate().any(|(i, (id, _))| i != *id) {
    return None;
  }
  Some(names.into_iter().map(|(_, name)| name).collect())
}

/// 原图到模型输入的等比缩放与填充参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
  scale: f32,
  pad_x: f32,
  pad_y: f32,
  resized: (u32, u32),
  width: f32,
  height: f32,
}

impl Letterbox {
  pub(crate) fn new(width: u32, height: u32, size: u32) -> Self {
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    Self {
      scale,
      pad_x: ((size - new_w) / 2) as f32,
      pad_y: ((size - new_h) / 2) as f32,
      resized: (new_w, new_h),
      width: width as f32,
      height: height as f32,
    }
  }

  /// 模型坐标系下的中心点框转换为原图像素坐标，并裁剪到图像范围内
  fn restore(&self, cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
    let x_min = (cx - w / 2.0 - self.pad_x) / self.scale;
    let y_min = (cy - h / 2.0 - self.pad_y) / self.scale;
    let x_max = (cx + w / 2.0 - self.pad_x) / self.scale;
    let y_max = (cy + h / 2.0 - self.pad_y) / self.scale;
    [
      x_min.clamp(0.0, self.width),
      y_min.clamp(0.0, self.height),
      x_max.clamp(0.0, self.width),
      y_max.clamp(0.0, self.height),
    ]
  }
}

impl Yolov8 {
  fn preprocess(&self, frame: &NhwcFrame) -> Result<(Tensor, Letterbox), Yolov8Error> {
    if frame.width() == 0 || frame.height() == 0 {
      return Err(Yolov8Error::Frame("图像尺寸为零".to_string()));
    }

    // 通道顺序已经由帧决定，这里只做几何变换
    let source = RgbImage::from_raw(frame.width(), frame.height(), frame.as_nhwc().to_vec())
      .ok_or_else(|| Yolov8Error::Frame("帧数据长度与尺寸不符".to_string()))?;

    let size = self.input_size;
    let letterbox = Letterbox::new(frame.width(), frame.height(), size);
    let (new_w, new_h) = letterbox.resized;
    let resized = imageops::resize(&source, new_w, new_h, imageops::FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([YOLOV8_PAD_VALUE; 3]));
    imageops::replace(
      &mut canvas,
      &resized,
      letterbox.pad_x as i64,
      letterbox.pad_y as i64,
    );

    let input = tract_ndarray::Array4::from_shape_fn(
      (1, 3, size as usize, size as usize),
      |(_, channel, y, x)| canvas.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
    );

    Ok((input.into_tensor(), letterbox))
  }
}

impl Model for Yolov8 {
  type Error = Yolov8Error;

  fn name(&self) -> &str {
    "yolov8"
  }

  fn channel_order(&self) -> ChannelOrder {
    self.order
  }

  fn labels(&self) -> &LabelSet {
    &self.labels
  }

  fn infer(&self, input: &NhwcFrame, confidence: f32) -> Result<DetectResult<ClassLabel>, Self::Error> {
    debug!("预处理输入帧: {}x{}", input.width(), input.height());
    let (tensor, letterbox) = self.preprocess(input)?;

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(Yolov8Error::Inference)?;

    let output = outputs
      .first()
      .ok_or_else(|| Yolov8Error::OutputShape("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(Yolov8Error::Inference)?;

    let items = postprocess(
      view,
      &self.labels,
      confidence,
      self.nms_threshold,
      &letterbox,
    )?;
    debug!("检测到 {} 个物体", items.len());

    Ok(items.into())
  }
}

/// 解析 `[1, 4 + nc, n]` 或转置后的 `[1, n, 4 + nc]` 输出
pub(crate) fn postprocess(
  view: tract_ndarray::ArrayViewD<'_, f32>,
  labels: &LabelSet,
  confidence: f32,
  nms_threshold: f32,
  letterbox: &Letterbox,
) -> Result<Vec<DetectItem<ClassLabel>>, Yolov8Error> {
  let rows = YOLOV8_BOX_ROWS + labels.len();
  let view = view
    .into_dimensionality::<tract_ndarray::Ix3>()
    .map_err(|e| Yolov8Error::OutputShape(format!("期望三维输出: {}", e)))?;

  let view = match view.dim() {
    (1, r, _) if r == rows => view,
    (1, _, r) if r == rows => view.permuted_axes([0, 2, 1]),
    shape => {
      return Err(Yolov8Error::OutputShape(format!(
        "输出形状 {:?} 与 {} 个类别不符",
        shape,
        labels.len()
      )));
    }
  };

  let candidates = view.shape()[2];
  let mut items = Vec::new();

  for i in 0..candidates {
    let (class_id, score) = (0..labels.len())
      .map(|c| (c, view[[0, YOLOV8_BOX_ROWS + c, i]]))
      .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if score < confidence {
      continue;
    }

    let bbox = letterbox.restore(
      view[[0, 0, i]],
      view[[0, 1, i]],
      view[[0, 2, i]],
      view[[0, 3, i]],
    );
    if bbox[0] >= bbox[2] || bbox[1] >= bbox[3] {
      continue;
    }

    let Some(kind) = labels.get(class_id as u32) else {
      continue;
    };

    items.push(DetectItem {
      kind: kind.clone(),
      score,
      bbox,
    });
  }

  debug!("置信度过滤后候选数量: {}", items.len());
  Ok(nms(items, nms_threshold))
}

/// 按类别的非极大值抑制
fn nms(mut items: Vec<DetectItem<ClassLabel>>, threshold: f32) -> Vec<DetectItem<ClassLabel>> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem<ClassLabel>> = Vec::with_capacity(items.len());
  for item in items {
    let suppressed = kept
      .iter()
      .any(|k| k.kind == item.kind && iou(&k.bbox, &item.bbox) > threshold);
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tract_ndarray::Array3;

  fn labels() -> LabelSet {
    LabelSet::from_names(["sprite", "coke"]).unwrap()
  }

  // 每个候选: (cx, cy, w, h, [类别分数])
  fn output(candidates: &[(f32, f32, f32, f32, [f32; 2])]) -> Array3<f32> {
    let mut out = Array3::<f32>::zeros((1, 6, candidates.len()));
    for (i, (cx, cy, w, h, scores)) in candidates.iter().enumerate() {
      out[[0, 0, i]] = *cx;
      out[[0, 1, i]] = *cy;
      out[[0, 2, i]] = *w;
      out[[0, 3, i]] = *h;
      out[[0, 4, i]] = scores[0];
      out[[0, 5, i]] = scores[1];
    }
    out
  }

  #[test]
  fn filters_by_confidence_and_suppresses_overlaps() {
    let out = output(&[
      (100.0, 100.0, 50.0, 80.0, [0.9, 0.1]),
      (102.0, 101.0, 50.0, 80.0, [0.8, 0.1]),
      (400.0, 300.0, 60.0, 60.0, [0.05, 0.7]),
      (500.0, 500.0, 40.0, 40.0, [0.3, 0.2]),
    ]);
    let letterbox = Letterbox::new(640, 640, 640);

    let items = postprocess(out.view().into_dyn(), &labels(), 0.6, 0.7, &letterbox).unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind.name(), "sprite");
    assert_eq!(items[0].score, 0.9);
    assert_eq!(items[0].bbox, [75.0, 60.0, 125.0, 140.0]);
    assert_eq!(items[1].kind.name(), "coke");
  }

  #[test]
  fn same_box_different_class_is_not_suppressed() {
    let out = output(&[
      (100.0, 100.0, 50.0, 80.0, [0.9, 0.1]),
      (100.0, 100.0, 50.0, 80.0, [0.1, 0.85]),
    ]);
    let letterbox = Letterbox::new(640, 640, 640);
    let items = postprocess(out.view().into_dyn(), &labels(), 0.6, 0.7, &letterbox).unwrap();
    assert_eq!(items.len(), 2);
  }

  #[test]
  fn restores_letterboxed_coordinates() {
    // 1280x640 缩放 0.5 后为 640x320，上下各填充 160
    let letterbox = Letterbox::new(1280, 640, 640);
    let out = output(&[(320.0, 320.0, 100.0, 100.0, [0.95, 0.0])]);

    let items = postprocess(out.view().into_dyn(), &labels(), 0.6, 0.7, &letterbox).unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].bbox, [540.0, 220.0, 740.0, 420.0]);
  }

  #[test]
  fn clips_boxes_to_the_original_image() {
    let letterbox = Letterbox::new(640, 640, 640);
    let out = output(&[(10.0, 630.0, 60.0, 60.0, [0.95, 0.0])]);

    let items = postprocess(out.view().into_dyn(), &labels(), 0.6, 0.7, &letterbox).unwrap();

    assert_eq!(items[0].bbox, [0.0, 600.0, 40.0, 640.0]);
  }

  #[test]
  fn accepts_transposed_output() {
    let out = output(&[(100.0, 100.0, 50.0, 80.0, [0.9, 0.1])]);
    let transposed = out.view().permuted_axes([0, 2, 1]).to_owned();
    let letterbox = Letterbox::new(640, 640, 640);

    let items =
      postprocess(transposed.view().into_dyn(), &labels(), 0.6, 0.7, &letterbox).unwrap();
    assert_eq!(items.len(), 1);
  }

  #[test]
  fn rejects_output_with_wrong_class_count() {
    let out = Array3::<f32>::zeros((1, 9, 4));
    let letterbox = Letterbox::new(640, 640, 640);
    let err = postprocess(out.view().into_dyn(), &labels(), 0.6, 0.7, &letterbox).unwrap_err();
    assert!(matches!(err, Yolov8Error::OutputShape(_)));
  }

  #[test]
  fn parses_model_url() {
    let url = Url::parse("yolov8:///models/best.onnx?size=320&order=bgr&nms=0.5").unwrap();
    let builder = Yolov8Builder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/best.onnx"));
    assert_eq!(builder.input_size, 320);
    assert_eq!(builder.order, ChannelOrder::Bgr);
    assert_eq!(builder.nms_threshold, 0.5);
  }

  #[test]
  fn relative_path_and_bare_path_sources() {
    let builder = Yolov8Builder::from_source("yolov8:weights/best.onnx").unwrap();
    assert_eq!(builder.model_path, PathBuf::from("weights/best.onnx"));

    let builder = Yolov8Builder::from_source("best.onnx").unwrap();
    assert_eq!(builder.model_path, PathBuf::from("best.onnx"));
    assert_eq!(builder.input_size, YOLOV8_DEFAULT_INPUT_SIZE);
  }

  #[test]
  fn rejects_wrong_scheme_and_bad_query() {
    let url = Url::parse("file:///models/best.onnx").unwrap();
    assert!(matches!(
      Yolov8Builder::from_url(&url),
      Err(Yolov8Error::ModelPathError(_))
    ));

    let url = Url::parse("yolov8:///models/best.onnx?order=yuv").unwrap();
    assert!(Yolov8Builder::from_url(&url).is_err());
  }

  #[test]
  fn build_requires_existing_file() {
    let err = Yolov8Builder::new("/nonexistent/best.onnx").build().err().unwrap();
    assert!(matches!(err, Yolov8Error::ModelPathError(_)));

    let err = Yolov8Builder::new("/nonexistent/best.onnx")
      .labels(labels())
      .build()
      .err()
      .unwrap();
    assert!(matches!(err, Yolov8Error::ModelPathError(_)));
  }

  #[test]
  fn output_shape_must_match_label_count() {
    assert!(check_output_shape(&[1, 6, 8400], 2).is_ok());
    assert!(check_output_shape(&[1, 8400, 6], 2).is_ok());

    // 单类别类别表配上 80 类模型
    let err = check_output_shape(&[1, 84, 8400], 1).unwrap_err();
    assert!(matches!(err, Yolov8Error::Labels(_)));
    assert!(check_output_shape(&[2, 6, 8400], 2).is_err());
    assert!(check_output_shape(&[6, 8400], 2).is_err());
  }

  #[test]
  fn parses_ultralytics_names_metadata() {
    assert_eq!(
      parse_names_metadata("{0: 'sprite', 1: 'coke', 2: \"diet coke\"}"),
      Some(vec![
        "sprite".to_string(),
        "coke".to_string(),
        "diet coke".to_string()
      ])
    );
    assert_eq!(
      parse_names_metadata("{1: 'coke', 0: 'sprite'}"),
      Some(vec!["sprite".to_string(), "coke".to_string()])
    );
    assert_eq!(parse_names_metadata("{}"), None);
    assert_eq!(parse_names_metadata("{0: 'sprite', 2: 'coke'}"), None);
    assert_eq!(parse_names_metadata("['sprite']"), None);
  }
}
