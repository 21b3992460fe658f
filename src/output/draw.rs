// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;

use crate::model::{DetectItem, DetectResult, WithLabel, title_case};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 3;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0];

static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法加载字体: {0}")]
  Font(#[from] InvalidFont),
}

pub struct Draw {
  font_size: f32,
  padding: i32,
  thickness: i32,
  box_color: [u8; 3],
  text_color: [u8; 3],
  font: FontRef<'static>,
}

impl Draw {
  /// 使用内嵌字体
  pub fn new() -> Result<Self, DrawError> {
    let font = FontRef::try_from_slice(EMBEDDED_FONT)?;
    Ok(Self {
      font_size: LABEL_FONT_SIZE,
      padding: LABEL_PADDING,
      thickness: BOX_THICKNESS,
      box_color: BOX_COLOR,
      text_color: LABEL_TEXT_COLOR,
      font,
    })
  }

  /// 在原图副本上绘制 `target_label` 类别的检测框，原图保持不变
  pub fn annotate<T: WithLabel>(
    &self,
    image: &RgbImage,
    result: &DetectResult<T>,
    target_label: &str,
  ) -> RgbImage {
    let mut canvas = image.clone();
    for DetectItem { kind, score, bbox } in result.iter().filter(|i| i.kind.is_label(target_label)) {
      self.draw_bbox_with_label(&mut canvas, bbox, &caption(&kind.to_label_str(), *score));
    }
    canvas
  }

  // bbox 为原图像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &[f32; 4], caption: &str) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    // 裁剪到图像范围
    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.box_color);

    // 向内逐像素加粗边框
    for t in 0..self.thickness {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, &self.font, caption);
    let label_width = text_width as i32 + 2 * self.padding;
    let label_height = text_height as i32 + 2 * self.padding;

    // 标签放在框的左上角上方，上方空间不足时放进框内
    let label_x = x_min;
    let label_y = if y_min - label_height >= 0 {
      y_min - label_height
    } else {
      y_min
    };

    let label_width = label_width.min(w - label_x);
    let label_height = label_height.min(h - label_y);
    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb(self.text_color),
      label_x + self.padding,
      label_y + self.padding,
      scale,
      &self.font,
      caption,
    );
  }
}

/// 标注文字，如 `Sprite 0.90`
fn caption(label: &str, score: f32) -> String {
  format!("{} {:.2}", title_case(label), score)
}
