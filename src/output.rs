// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/output.rs - 可视化输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::warn;

use crate::model::DetectResult;

pub mod draw;
pub use self::draw::{Draw, DrawError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error(transparent)]
  Draw(#[from] DrawError),
}

/// 把标注后的检测结果写成图像文件
pub struct VisOutput {
  path: PathBuf,
  draw: Draw,
}

impl VisOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    VisOutput {
      path: path.into(),
      draw: Draw::new(),
    }
  }

  /// 提供字体文件后边框上方会渲染标签文本
  pub fn with_font(path: impl Into<PathBuf>, font_path: &Path) -> Result<Self, OutputError> {
    Ok(VisOutput {
      path: path.into(),
      draw: Draw::with_font(font_path)?,
    })
  }

  pub fn render(&self, image: &RgbImage, result: &DetectResult) -> Result<(), OutputError> {
    let mut canvas = image.clone();
    self.draw.draw_detections_on_image(&mut canvas, result);

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    canvas.save(&self.path)?;

    warn!("保存可视化结果到: {}", self.path.display());
    Ok(())
  }
}
