// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/web/page.rs - 仪表盘页面渲染
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

use std::fmt::Write;

use crate::{model::title_case, stock::StockStatus};

const STYLE: &str = r#"
body { font-family: "Segoe UI", Helvetica, Arial, sans-serif; margin: 0; background: #f6f7f9; color: #202124; }
main { max-width: 960px; margin: 0 auto; padding: 32px 24px; }
h1 { text-align: left; margin-bottom: 30px; }
form.upload { display: flex; gap: 12px; align-items: center; padding: 16px; background: #fff; border: 1px solid #dadce0; border-radius: 8px; }
.placeholder { margin-top: 24px; padding: 48px; text-align: center; color: #5f6368; border: 2px dashed #dadce0; border-radius: 8px; }
.metric { margin-top: 24px; font-size: 28px; font-weight: 600; }
.banner { margin-top: 16px; display: flex; gap: 12px; align-items: center; padding: 12px 16px; border-left: 6px solid; border-radius: 4px; background: #fff; }
.banner .icon { font-size: 24px; }
.banner .badge { color: #fff; font-weight: 700; padding: 2px 10px; border-radius: 12px; }
.notice { margin-top: 24px; padding: 12px 16px; border-radius: 4px; background: #fce8e6; color: #a50e0e; }
figure { margin: 24px 0 0 0; }
figure img { width: 100%; height: auto; border-radius: 4px; }
figcaption { color: #5f6368; text-align: center; margin-top: 8px; }
footer { margin-top: 32px; color: #80868b; font-size: 12px; }
"#;

/// 页面的三种状态
pub enum Outcome<'a> {
  Empty,
  Success {
    count: usize,
    status: StockStatus,
    image_png_base64: &'a str,
    inference_ms: f64,
  },
  Failure {
    message: &'a str,
  },
}

pub struct PageView<'a> {
  pub target_label: &'a str,
  pub model_name: &'a str,
  pub confidence: f32,
  pub outcome: Outcome<'a>,
}

pub fn escape(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      '\'' => escaped.push_str("&#39;"),
      _ => escaped.push(c),
    }
  }
  escaped
}

pub fn render(view: &PageView<'_>) -> String {
  let label = escape(&title_case(view.target_label));
  let mut html = String::new();

  // 写入 String 不会失败
  let _ = write!(
    html,
    r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{label} Detector</title>
<style>{STYLE}</style>
</head>
<body>
<main>
<h1>{label} Detection Dashboard</h1>
<form class="upload" method="post" action="/" enctype="multipart/form-data">
<label for="image">Upload an image</label>
<input type="file" id="image" name="image" accept=".jpg,.jpeg,.png" required>
<button type="submit">Analyze</button>
</form>
"#
  );

  match &view.outcome {
    Outcome::Empty => {
      let _ = write!(
        html,
        r#"<div class="placeholder">Upload a shelf photo (JPG or PNG) to count {} bottles.</div>
"#,
        escape(view.target_label)
      );
    }
    Outcome::Success {
      count,
      status,
      image_png_base64,
      inference_ms,
    } => {
      let color = status.color();
      let _ = write!(
        html,
        r#"<div class="metric">{label} bottles detected: {count}</div>
<div class="banner banner-{tone}" style="border-color: {color}">
<span class="icon" style="color: {color}">{icon}</span>
<span class="badge" style="background: {color}">{badge}</span>
<span class="message">{message}</span>
</div>
<figure>
<img src="data:image/png;base64,{image_png_base64}" alt="{label} Detections">
<figcaption>{label} Detections</figcaption>
</figure>
<footer>Inference took {inference_ms:.1} ms.</footer>
"#,
        tone = status.tone(),
        icon = status.icon(),
        badge = status.label(),
        message = status.message(),
      );
    }
    Outcome::Failure { message } => {
      let _ = write!(
        html,
        r#"<div class="notice" role="alert">Could not analyze the upload: {}</div>
"#,
        escape(message)
      );
    }
  }

  let _ = write!(
    html,
    r#"<footer>Model {} · confidence threshold {:.2}</footer>
</main>
</body>
</html>
"#,
    escape(view.model_name),
    view.confidence
  );

  html
}
