// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/model.rs - 模型
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

use crate::frame::{ChannelOrder, NhwcFrame};

/// 目标检测模型
///
/// 模型在进程启动时加载一次，此后只读。`infer` 按给定置信度阈值过滤输出，
/// 调用方不再二次过滤。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn name(&self) -> &str;
  fn channel_order(&self) -> ChannelOrder;
  fn labels(&self) -> &LabelSet;
  fn infer(&self, input: &NhwcFrame, confidence: f32) -> Result<DetectResult<ClassLabel>, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> Default for DetectResult<T> {
  fn default() -> Self {
    Self {
      items: Box::new([]),
    }
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl<T> DetectResult<T> {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem<T>> {
    self.items.iter()
  }
}

impl<T: WithLabel> DetectResult<T> {
  pub fn count_label(&self, name: &str) -> usize {
    self.items.iter().filter(|item| item.kind.is_label(name)).count()
  }
}

impl<T: WithLabel + Clone> DetectResult<T> {
  pub fn filter_label(&self, name: &str) -> DetectResult<T> {
    self
      .items
      .iter()
      .filter(|item| item.kind.is_label(name))
      .cloned()
      .collect::<Vec<_>>()
      .into()
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;

  fn is_label(&self, name: &str) -> bool {
    self.to_label_str() == name
  }
}

mod labels;
pub use self::labels::{ClassLabel, LabelError, LabelSet, title_case};

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error};
