// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;

/// Hengshan 检测基准参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录路径
  #[arg(long, value_name = "DIR")]
  pub model: PathBuf,

  /// 输入图像路径
  #[arg(long, value_name = "FILE")]
  pub image: PathBuf,

  /// 基准配置文件路径
  #[arg(long, value_name = "FILE")]
  pub config_path: PathBuf,

  /// 推理后端，覆盖配置文件中的 backend 项
  /// 可选: paddle, mnn, tnn, ncnn
  #[arg(long, value_name = "BACKEND")]
  pub backend: Option<String>,

  /// 关闭后处理中的 NMS
  #[arg(long)]
  pub no_nms: bool,

  /// 使用量化模型
  #[arg(long)]
  pub quant: bool,

  /// 标签字体文件路径，缺省时只绘制边框
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}
