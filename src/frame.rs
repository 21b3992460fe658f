// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use std::{fmt, str::FromStr};

use image::RgbImage;

const RGB_CHANNELS: usize = 3;

/// 模型期望的通道顺序
///
/// 解码后的图像总是 RGB。模型若要求 BGR，则在送入前交换第 0 与第 2 通道。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl fmt::Display for ChannelOrder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChannelOrder::Rgb => write!(f, "rgb"),
      ChannelOrder::Bgr => write!(f, "bgr"),
    }
  }
}

impl FromStr for ChannelOrder {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb" => Ok(ChannelOrder::Rgb),
      "bgr" => Ok(ChannelOrder::Bgr),
      other => Err(format!("未知的通道顺序: {}", other)),
    }
  }
}

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// 单张图像的 NHWC 字节帧，通道顺序由 `order` 标明
#[derive(Debug, Clone)]
pub struct NhwcFrame {
  width: u32,
  height: u32,
  order: ChannelOrder,
  data: Box<[u8]>,
}

impl NhwcFrame {
  pub fn from_rgb_image(image: &RgbImage, order: ChannelOrder) -> Self {
    let mut data = image.as_raw().clone();
    if order == ChannelOrder::Bgr {
      swap_red_blue(&mut data);
    }

    Self {
      width: image.width(),
      height: image.height(),
      order,
      data: data.into_boxed_slice(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn order(&self) -> ChannelOrder {
    self.order
  }
}

impl AsNhwcFrame for NhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

fn swap_red_blue(data: &mut [u8]) {
  for pixel in data.chunks_exact_mut(RGB_CHANNELS) {
    pixel.swap(0, 2);
  }
}
