// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;

use crate::tensor::Tensor;

#[derive(Error, Debug)]
pub enum DetectResultError {
  #[error(
    "检测结果的并行序列长度不一致: boxes={boxes}, label_ids={label_ids}, scores={scores}"
  )]
  ParallelLength {
    boxes: usize,
    label_ids: usize,
    scores: usize,
  },
}

/// 单个检测框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectItem {
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
  pub label_id: i32,
  pub score: f32,
}

/// 检测结果。boxes / label_ids / scores 三个序列等长，
/// 只能通过 `push` 或 `from_parts` 构造以维持该不变量。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  boxes: Vec<[f32; 4]>,
  label_ids: Vec<i32>,
  scores: Vec<f32>,
}

impl DetectResult {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_capacity(capacity: usize) -> Self {
    DetectResult {
      boxes: Vec::with_capacity(capacity),
      label_ids: Vec::with_capacity(capacity),
      scores: Vec::with_capacity(capacity),
    }
  }

  pub fn from_parts(
    boxes: Vec<[f32; 4]>,
    label_ids: Vec<i32>,
    scores: Vec<f32>,
  ) -> Result<Self, DetectResultError> {
    if boxes.len() != label_ids.len() || boxes.len() != scores.len() {
      return Err(DetectResultError::ParallelLength {
        boxes: boxes.len(),
        label_ids: label_ids.len(),
        scores: scores.len(),
      });
    }
    Ok(DetectResult {
      boxes,
      label_ids,
      scores,
    })
  }

  pub fn push(&mut self, item: DetectItem) {
    self.boxes.push(item.bbox);
    self.label_ids.push(item.label_id);
    self.scores.push(item.score);
  }

  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  pub fn boxes(&self) -> &[[f32; 4]] {
    &self.boxes
  }

  pub fn label_ids(&self) -> &[i32] {
    &self.label_ids
  }

  pub fn scores(&self) -> &[f32] {
    &self.scores
  }

  pub fn iter(&self) -> impl Iterator<Item = DetectItem> + '_ {
    self
      .boxes
      .iter()
      .zip(&self.label_ids)
      .zip(&self.scores)
      .map(|((&bbox, &label_id), &score)| DetectItem {
        bbox,
        label_id,
        score,
      })
  }
}

/// 检测模型的分阶段接口。
/// `predict` 为默认的整链调用；精度对比需要逐阶段访问中间张量。
pub trait DetectModel {
  type Error: std::error::Error + Send + Sync + 'static;

  fn preprocess(&self, image: &RgbImage) -> Result<Vec<Tensor>, Self::Error>;
  fn infer(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, Self::Error>;
  fn postprocess(&self, outputs: &[Tensor]) -> Result<DetectResult, Self::Error>;

  fn predict(&self, image: &RgbImage) -> Result<DetectResult, Self::Error> {
    let inputs = self.preprocess(image)?;
    let outputs = self.infer(&inputs)?;
    self.postprocess(&outputs)
  }
}

mod picodet;
pub use self::picodet::{PicoDet, PicoDetBuilder, PicoDetError};
