// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/bin/diff_results.rs - 离线结果对比工具
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use hengshan::diff::{DetDiff, tensor_diff};
use hengshan::model::DetectResult;
use hengshan::persist;
use hengshan::tensor::Tensor;

/// 对比当前结果与历史金标准结果的差异统计
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 当前结果文件
  #[arg(long, value_name = "FILE")]
  pub current: PathBuf,

  /// 金标准结果文件
  #[arg(long, value_name = "FILE")]
  pub golden: PathBuf,

  /// 按张量而不是检测结果对比
  #[arg(long)]
  pub tensor: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("当前结果: {}", args.current.display());
  info!("金标准结果: {}", args.golden.display());

  if args.tensor {
    let current: Tensor = persist::load(&args.current)?;
    let golden: Tensor = persist::load(&args.golden)?;
    let diff = tensor_diff(&current, &golden)?;
    info!("Tensor diff: {}", diff);
  } else {
    let current: DetectResult = persist::load(&args.current)?;
    let golden: DetectResult = persist::load(&args.golden)?;
    let diff = DetDiff::between(&current, &golden)?;
    info!("Boxes diff: {}", diff.boxes);
    info!("Label_ids diff: {}", diff.labels);
    info!("Scores diff: {}", diff.scores);
  }

  Ok(())
}
