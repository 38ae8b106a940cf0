// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/main.rs - PicoDet 检测基准入口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use image::ImageReader;
use tracing::{error, info};

use hengshan::config::BenchConfig;
use hengshan::model::PicoDetBuilder;
use hengshan::task::BenchTask;

/// 可视化结果的固定文件名，每次运行覆盖
const VIS_RESULT_FILE: &str = "vis_result.jpg";

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("Hengshan 检测基准");
  info!("模型目录: {}", args.model.display());
  info!("输入图像: {}", args.image.display());
  info!("基准配置: {}", args.config_path.display());

  let config = match BenchConfig::resolve(
    args.model.clone(),
    args.image.clone(),
    &args.config_path,
    args.backend.as_deref(),
    args.no_nms,
    args.quant,
    args.font.clone(),
  ) {
    Ok(config) => config,
    Err(e) => {
      error!("运行时配置构建失败: {}", e);
      std::process::exit(-1);
    }
  };

  let artifacts = config
    .backend
    .resolve_artifacts(&config.model_dir, config.quant);
  info!("模型格式: {}", artifacts.format);

  let image = ImageReader::open(&config.image_path)?.decode()?.into_rgb8();
  info!("输入图像尺寸: {}x{}", image.width(), image.height());

  let model = PicoDetBuilder::from_artifacts(&artifacts)
    .with_nms(config.nms)
    .build()?;

  let outcome = BenchTask::new(&config).run(&model, &image)?;

  #[cfg(feature = "vis")]
  {
    use hengshan::output::VisOutput;
    use tracing::warn;

    let vis = match &config.font_path {
      Some(font_path) => VisOutput::with_font(VIS_RESULT_FILE, font_path),
      None => Ok(VisOutput::new(VIS_RESULT_FILE)),
    };
    match vis {
      Ok(vis) => {
        if let Err(e) = vis.render(&image, &outcome.detections) {
          warn!("可视化输出失败: {}", e);
        }
      }
      Err(e) => warn!("可视化输出失败: {}", e),
    }
  }

  if let Some(e) = outcome.comparison_error {
    error!("精度对比失败: {}", e);
    std::process::exit(1);
  }

  info!("基准完成");
  Ok(())
}
