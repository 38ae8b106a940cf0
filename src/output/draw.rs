// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use thiserror::Error;

use crate::model::{DetectItem, DetectResult};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const PALETTE_SIZE: usize = 80;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件 {path}: {source}")]
  FontIo {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("字体文件无效: {path}")]
  FontInvalid { path: PathBuf },
}

#[derive(Debug)]
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new()
  }
}

impl Draw {
  /// 不带字体的绘制器，只画边框
  pub fn new() -> Self {
    // 按类别生成一组颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        Self::hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      colors,
    }
  }

  pub fn with_font(font_path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(font_path).map_err(|source| DrawError::FontIo {
      path: font_path.to_path_buf(),
      source,
    })?;
    let font = FontVec::try_from_vec(data).map_err(|_| DrawError::FontInvalid {
      path: font_path.to_path_buf(),
    })?;

    let mut draw = Self::new();
    draw.font = Some(font);
    Ok(draw)
  }

  /// HSV 转 RGB
  fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
      (c, x, 0.0)
    } else if h < 120.0 {
      (x, c, 0.0)
    } else if h < 180.0 {
      (0.0, c, x)
    } else if h < 240.0 {
      (0.0, x, c)
    } else if h < 300.0 {
      (x, 0.0, c)
    } else {
      (c, 0.0, x)
    };

    Rgb([
      ((r + m) * 255.0) as u8,
      ((g + m) * 255.0) as u8,
      ((b + m) * 255.0) as u8,
    ])
  }

  // 在图像上绘制一个矩形边框，bbox 为原图像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &DetectItem, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);

    let mut x_min = item.bbox[0].floor() as i32;
    let mut y_min = item.bbox[1].floor() as i32;
    let mut x_max = item.bbox[2].ceil() as i32;
    let mut y_max = item.bbox[3].ceil() as i32;

    // Clamp to image bounds
    x_min = x_min.clamp(0, w - 1);
    y_min = y_min.clamp(0, h - 1);
    x_max = x_max.clamp(0, w - 1);
    y_max = y_max.clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 绘制边框（加粗为2像素）
    for thickness in 0..2 {
      let x_min_t = (x_min + thickness).min(w - 1);
      let y_min_t = (y_min + thickness).min(h - 1);
      let x_max_t = (x_max - thickness).max(0);
      let y_max_t = (y_max - thickness).max(0);

      // Top and bottom edges
      for x in x_min_t..=x_max_t {
        *image.get_pixel_mut(x as u32, y_min_t as u32) = color;
        *image.get_pixel_mut(x as u32, y_max_t as u32) = color;
      }

      // Left and right edges
      for y in y_min_t..=y_max_t {
        *image.get_pixel_mut(x_min_t as u32, y as u32) = color;
        *image.get_pixel_mut(x_max_t as u32, y as u32) = color;
      }
    }

    let Some(font) = &self.font else {
      return;
    };

    // 创建标签文本
    let label = format!("{} {:.2}", item.label_id, item.score);

    let scale = PxScale::from(self.font_size);
    let text_color = Rgb([255u8, 255u8, 255u8]); // 白色文本

    // 估算文本大小（粗略估计）
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 确定标签背景位置（在边框上方）
    let label_x = x_min.max(0);
    let label_y = (y_min - text_height).max(0);

    // 确保标签不超出图像边界
    let max_width = (w - label_x).max(0);
    let label_width = text_width.min(max_width) as u32;
    let label_height = text_height as u32;

    // 仅在标签有空间时绘制
    if label_width > 0 && label_height > 0 {
      let rect = imageproc::rect::Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);

      draw_text_mut(
        image,
        text_color,
        label_x,
        label_y + self.label_text_vertical_padding,
        scale,
        font,
        &label,
      );
    }
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    for item in result.iter() {
      let color = self.colors[item.label_id.unsigned_abs() as usize % self.colors.len()];
      self.draw_bbox_with_label(image, &item, color);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn one_box(bbox: [f32; 4]) -> DetectResult {
    let mut result = DetectResult::new();
    result.push(DetectItem {
      bbox,
      label_id: 5,
      score: 0.8,
    });
    result
  }

  #[test]
  fn drawing_marks_the_border_pixels() {
    let mut image = RgbImage::from_pixel(40, 40, Rgb([0, 0, 0]));
    Draw::new().draw_detections_on_image(&mut image, &one_box([5.0, 5.0, 30.0, 30.0]));
    assert_ne!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
    assert_ne!(*image.get_pixel(30, 5), Rgb([0, 0, 0]));
  }

  #[test]
  fn out_of_bounds_boxes_are_clamped_not_panicking() {
    let mut image = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
    Draw::new().draw_detections_on_image(&mut image, &one_box([-10.0, -10.0, 100.0, 100.0]));
    Draw::new().draw_detections_on_image(&mut image, &one_box([15.0, 15.0, 5.0, 5.0]));
  }

  #[test]
  fn missing_font_file_is_reported() {
    let err = Draw::with_font(Path::new("/no/such/font.ttf")).unwrap_err();
    assert!(matches!(err, DrawError::FontIo { .. }));
  }
}
