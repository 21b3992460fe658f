// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/config.rs - 运行配置：默认值 < 配置文件 < 命令行
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
  net::SocketAddr,
  path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  args::ConfigArgs,
  model::{LabelError, LabelSet},
  pipeline::{
    DEFAULT_CONFIDENCE, DEFAULT_MAX_DIMENSION, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_TARGET_LABEL,
    PipelineSettings, UploadLimits,
  },
  stock::{DEFAULT_CRITICAL_AT_OR_BELOW, DEFAULT_OPTIMAL_ABOVE, StockThresholds},
};

pub const DEFAULT_BIND: &str = "127.0.0.1:8501";
pub const DEFAULT_MODEL: &str = "best.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {0}: {1}")]
  Io(String, #[source] std::io::Error),
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
  #[error("类别表错误: {0}")]
  Labels(#[from] LabelError),
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
  server: Option<ServerSection>,
  model: Option<ModelSection>,
  detection: Option<DetectionSection>,
  stock: Option<StockSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServerSection {
  bind: Option<String>,
  max_upload_bytes: Option<usize>,
  max_dimension: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelSection {
  source: Option<String>,
  labels_file: Option<PathBuf>,
  labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionSection {
  confidence: Option<f32>,
  target_label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StockSection {
  optimal_above: Option<usize>,
  critical_at_or_below: Option<usize>,
}

/// 类别表来源
#[derive(Debug, Clone, PartialEq)]
pub enum LabelSource {
  File(PathBuf),
  Names(Vec<String>),
  /// 未配置时使用模型元数据中的类别表
  Model,
}

#[derive(Debug, Clone)]
pub struct Config {
  pub bind: SocketAddr,
  pub model: String,
  pub labels: LabelSource,
  pub settings: PipelineSettings,
}

impl Config {
  /// 读取 `--config` 指定的文件（若有），再叠加命令行参数
  pub fn load(args: &ConfigArgs) -> Result<Self, ConfigError> {
    let file = match args.config.as_deref() {
      Some(path) => read_config_file(path)?,
      None => FileConfig::default(),
    };
    let config = Self::resolve(file, args)?;
    info!(
      "配置加载完成: 监听 {}, 模型 {}, 目标类别 {}, 置信度 {}",
      config.bind, config.model, config.settings.target_label, config.settings.confidence
    );
    Ok(config)
  }

  pub fn from_toml_str(text: &str, args: &ConfigArgs) -> Result<Self, ConfigError> {
    Self::resolve(toml::from_str(text)?, args)
  }

  fn resolve(file: FileConfig, args: &ConfigArgs) -> Result<Self, ConfigError> {
    let server = file.server.unwrap_or_default();
    let model = file.model.unwrap_or_default();
    let detection = file.detection.unwrap_or_default();
    let stock = file.stock.unwrap_or_default();

    let bind = args
      .bind
      .clone()
      .or(server.bind)
      .unwrap_or_else(|| DEFAULT_BIND.to_string());
    let bind: SocketAddr = bind
      .parse()
      .map_err(|e| ConfigError::Invalid(format!("监听地址 {} 无法解析: {}", bind, e)))?;

    let source = args
      .model
      .clone()
      .or(model.source)
      .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    // 命令行给出的类别文件优先于配置文件中的任何类别声明
    let labels = match (args.labels_file.clone(), model.labels_file, model.labels) {
      (Some(path), _, _) => LabelSource::File(path),
      (None, Some(_), Some(_)) => {
        return Err(ConfigError::Invalid(
          "labels_file 与 labels 不能同时配置".to_string(),
        ));
      }
      (None, Some(path), None) => LabelSource::File(path),
      (None, None, Some(names)) => LabelSource::Names(names),
      (None, None, None) => LabelSource::Model,
    };

    let confidence = args
      .confidence
      .or(detection.confidence)
      .unwrap_or(DEFAULT_CONFIDENCE);
    let target_label = args
      .target_label
      .clone()
      .or(detection.target_label)
      .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string())
      .trim()
      .to_string();

    let thresholds = StockThresholds::new(
      args
        .optimal_above
        .or(stock.optimal_above)
        .unwrap_or(DEFAULT_OPTIMAL_ABOVE),
      args
        .critical_at_or_below
        .or(stock.critical_at_or_below)
        .unwrap_or(DEFAULT_CRITICAL_AT_OR_BELOW),
    )
    .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let limits = UploadLimits {
      max_upload_bytes: args
        .max_upload_bytes
        .or(server.max_upload_bytes)
        .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
      max_dimension: args
        .max_dimension
        .or(server.max_dimension)
        .unwrap_or(DEFAULT_MAX_DIMENSION),
    };

    let config = Self {
      bind,
      model: source,
      labels,
      settings: PipelineSettings {
        confidence,
        target_label,
        thresholds,
        limits,
      },
    };
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let settings = &self.settings;
    if !(0.0..=1.0).contains(&settings.confidence) {
      return Err(ConfigError::Invalid(format!(
        "置信度阈值 {} 不在 [0, 1] 范围内",
        settings.confidence
      )));
    }
    if settings.target_label.is_empty() {
      return Err(ConfigError::Invalid("目标类别不能为空".to_string()));
    }
    if settings.limits.max_upload_bytes == 0 {
      return Err(ConfigError::Invalid("上传大小上限必须大于 0".to_string()));
    }
    if settings.limits.max_dimension == 0 {
      return Err(ConfigError::Invalid("图像边长上限必须大于 0".to_string()));
    }
    if self.model.trim().is_empty() {
      return Err(ConfigError::Invalid("模型来源不能为空".to_string()));
    }
    Ok(())
  }

  /// 解析配置的类别表；返回 `None` 时由模型自带的元数据提供
  pub fn label_set(&self) -> Result<Option<LabelSet>, ConfigError> {
    let labels = match &self.labels {
      LabelSource::File(path) => LabelSet::from_toml_file(path)?,
      LabelSource::Names(names) => LabelSet::from_names(names)?,
      LabelSource::Model => return Ok(None),
    };

    self.check_labels(&labels)?;
    Ok(Some(labels))
  }

  /// 类别表必须包含目标类别
  pub fn check_labels(&self, labels: &LabelSet) -> Result<(), ConfigError> {
    let target = &self.settings.target_label;
    if !labels.contains(target) {
      return Err(ConfigError::Invalid(format!(
        "目标类别 {} 不在类别表中",
        target
      )));
    }
    debug!("类别表: {:?}", labels.iter().map(|l| l.name()).collect::<Vec<_>>());
    Ok(())
  }
}

fn read_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
  let text = std::fs::read_to_string(path)
    .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
  Ok(toml::from_str(&text)?)
}
