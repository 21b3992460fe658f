// 该文件是 Shelfwatch （货架哨兵） 项目的一部分。
// src/bin/oneshot.rs - 单张图像分析
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use shelfwatch::{
  FromUrl,
  args::ConfigArgs,
  config::Config,
  input::ImageFileInput,
  model::{Model, Yolov8Builder},
  output::{Draw, SaveImageFileOutput},
  pipeline::DetectionPipeline,
};

/// 分析一张货架图像，写出标注图并在标准输出打印 JSON 摘要
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像（image:///path/to/shelf.jpg 或文件路径）
  #[arg(long, value_name = "SOURCE")]
  pub input: String,
  /// 标注图输出（image:///path/to/out.png 或文件路径）
  #[arg(long, value_name = "OUTPUT")]
  pub output: String,

  #[command(flatten)]
  pub config: ConfigArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = Config::load(&args.config)?;

  info!("模型来源: {}", config.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = ImageFileInput::from_source(&args.input)?;
  let output = match Url::parse(&args.output) {
    Ok(url) if url.scheme() == "image" => SaveImageFileOutput::from_url(&url)?,
    _ => SaveImageFileOutput::new(&args.output),
  };
  let mut builder = Yolov8Builder::from_source(&config.model)?;
  if let Some(labels) = config.label_set()? {
    builder = builder.labels(labels);
  }
  let model = builder.build()?;
  config.check_labels(model.labels())?;
  let pipeline = DetectionPipeline::new(model, Draw::new()?, config.settings.clone());

  info!("开始推理...");
  let analysis = pipeline.analyze(&input.read_bytes()?)?;
  output.save(&analysis.annotated)?;

  let report = analysis.report(pipeline.settings());
  println!("{}", serde_json::to_string_pretty(&report)?);

  Ok(())
}
