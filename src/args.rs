// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;

/// 命令行覆盖项，未给出的字段回退到配置文件与默认值
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConfigArgs {
  /// TOML 配置文件路径
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 模型来源
  /// 支持格式:
  /// - yolov8:///models/best.onnx?size=640&order=rgb&nms=0.7
  /// - 直接给出 ONNX 文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: Option<String>,
  /// 类别表文件 (TOML, `names = [...]`)，省略时读取模型元数据
  /// 类别表文件 (TOML, `names = [...]`)
  #[arg(long, value_name = "FILE")]
  pub labels_file: Option<PathBuf>,

  /// 监听地址
  #[arg(long, value_name = "ADDR")]
  pub bind: Option<String>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// 计数的目标类别
  #[arg(long, value_name = "LABEL")]
  pub target_label: Option<String>,

  /// 数量大于该值时库存充足
  #[arg(long, value_name = "COUNT")]
  pub optimal_above: Option<usize>,

  /// 数量小于等于该值时库存严重不足
  #[arg(long, value_name = "COUNT")]
  pub critical_at_or_below: Option<usize>,

  /// 上传大小上限（字节）
  #[arg(long, value_name = "BYTES")]
  pub max_upload_bytes: Option<usize>,

  /// 图像边长上限（像素）
  #[arg(long, value_name = "PIXELS")]
  pub max_dimension: Option<u32>,
}

/// Shelfwatch 服务参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub config: ConfigArgs,
}
