// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/diff.rs - 差异统计
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

use std::fmt;

use thiserror::Error;

use crate::model::DetectResult;
use crate::tensor::{DType, Tensor};

#[derive(Error, Debug, PartialEq)]
pub enum DiffError {
  #[error("参与对比的两组数据长度不一致: {lhs} 与 {rhs}")]
  LengthMismatch { lhs: usize, rhs: usize },
  #[error("参与对比的两个张量形状不一致: {lhs:?} 与 {rhs:?}")]
  ShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },
  #[error("参与对比的两个张量类型不一致: {lhs} 与 {rhs}")]
  DTypeMismatch { lhs: DType, rhs: DType },
}

/// 逐元素绝对差的统计量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffStatis {
  pub mean: f64,
  pub min: f64,
  pub max: f64,
}

impl DiffStatis {
  /// 空输入的约定结果，避免除零
  pub const ZERO: DiffStatis = DiffStatis {
    mean: 0.0,
    min: 0.0,
    max: 0.0,
  };
}

impl fmt::Display for DiffStatis {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "mean={:.6e}, max={:.6e}, min={:.6e}",
      self.mean, self.max, self.min
    )
  }
}

/// 两组等长数值的逐元素绝对差统计。
/// 两组都为空时返回全零；长度不一致时报错而不是截断。
pub fn diff_statis(lhs: &[f64], rhs: &[f64]) -> Result<DiffStatis, DiffError> {
  if lhs.len() != rhs.len() {
    return Err(DiffError::LengthMismatch {
      lhs: lhs.len(),
      rhs: rhs.len(),
    });
  }
  if lhs.is_empty() {
    return Ok(DiffStatis::ZERO);
  }

  let mut sum = 0.0f64;
  let mut min = f64::INFINITY;
  let mut max = f64::NEG_INFINITY;
  for (&a, &b) in lhs.iter().zip(rhs) {
    let diff = (a - b).abs();
    sum += diff;
    min = min.min(diff);
    max = max.max(diff);
  }

  Ok(DiffStatis {
    mean: sum / lhs.len() as f64,
    min,
    max,
  })
}

/// 检测结果逐字段的差异统计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetDiff {
  pub boxes: DiffStatis,
  pub labels: DiffStatis,
  pub scores: DiffStatis,
}

impl DetDiff {
  pub fn between(lhs: &DetectResult, rhs: &DetectResult) -> Result<Self, DiffError> {
    if lhs.len() != rhs.len() {
      return Err(DiffError::LengthMismatch {
        lhs: lhs.len(),
        rhs: rhs.len(),
      });
    }

    let flatten =
      |result: &DetectResult| -> Vec<f64> {
        result
          .boxes()
          .iter()
          .flat_map(|bbox| bbox.iter().map(|&v| v as f64))
          .collect()
      };
    let labels =
      |result: &DetectResult| -> Vec<f64> { result.label_ids().iter().map(|&v| v as f64).collect() };
    let scores =
      |result: &DetectResult| -> Vec<f64> { result.scores().iter().map(|&v| v as f64).collect() };

    Ok(DetDiff {
      boxes: diff_statis(&flatten(lhs), &flatten(rhs))?,
      labels: diff_statis(&labels(lhs), &labels(rhs))?,
      scores: diff_statis(&scores(lhs), &scores(rhs))?,
    })
  }
}

/// 两个张量的数据差异统计。形状与元素类型都必须一致。
pub fn tensor_diff(lhs: &Tensor, rhs: &Tensor) -> Result<DiffStatis, DiffError> {
  if lhs.shape() != rhs.shape() {
    return Err(DiffError::ShapeMismatch {
      lhs: lhs.shape().to_vec(),
      rhs: rhs.shape().to_vec(),
    });
  }
  if lhs.dtype() != rhs.dtype() {
    return Err(DiffError::DTypeMismatch {
      lhs: lhs.dtype(),
      rhs: rhs.dtype(),
    });
  }
  diff_statis(&lhs.data().to_f64_vec(), &rhs.data().to_f64_vec())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  fn sample_result() -> DetectResult {
    let mut result = DetectResult::new();
    result.push(DetectItem {
      bbox: [10.0, 20.0, 110.0, 220.0],
      label_id: 1,
      score: 0.9,
    });
    result.push(DetectItem {
      bbox: [30.0, 40.0, 50.0, 60.0],
      label_id: 4,
      score: 0.6,
    });
    result
  }

  #[test]
  fn identical_inputs_give_all_zero() {
    let result = sample_result();
    let diff = DetDiff::between(&result, &result).unwrap();
    assert_eq!(diff.boxes, DiffStatis::ZERO);
    assert_eq!(diff.labels, DiffStatis::ZERO);
    assert_eq!(diff.scores, DiffStatis::ZERO);
  }

  #[test]
  fn known_values_produce_expected_statistics() {
    let statis = diff_statis(&[1.0, 2.0, 3.0], &[1.5, 2.0, 1.0]).unwrap();
    assert!((statis.mean - (0.5 + 0.0 + 2.0) / 3.0).abs() < 1e-12);
    assert_eq!(statis.min, 0.0);
    assert_eq!(statis.max, 2.0);
  }

  #[test]
  fn empty_inputs_hit_the_zero_sentinel() {
    assert_eq!(diff_statis(&[], &[]).unwrap(), DiffStatis::ZERO);
    let empty = DetectResult::new();
    let diff = DetDiff::between(&empty, &empty).unwrap();
    assert_eq!(diff.boxes, DiffStatis::ZERO);
  }

  #[test]
  fn length_mismatch_is_rejected() {
    let err = diff_statis(&[1.0], &[1.0, 2.0]).unwrap_err();
    assert_eq!(err, DiffError::LengthMismatch { lhs: 1, rhs: 2 });

    let lhs = sample_result();
    let rhs = DetectResult::new();
    assert!(matches!(
      DetDiff::between(&lhs, &rhs),
      Err(DiffError::LengthMismatch { lhs: 2, rhs: 0 })
    ));
  }

  #[test]
  fn tensor_shape_mismatch_is_rejected() {
    let a = Tensor::from_f32("a", vec![2, 2], vec![0.0; 4]).unwrap();
    let b = Tensor::from_f32("b", vec![4], vec![0.0; 4]).unwrap();
    assert!(matches!(
      tensor_diff(&a, &b),
      Err(DiffError::ShapeMismatch { .. })
    ));
  }

  #[test]
  fn tensor_dtype_mismatch_is_rejected() {
    let a = Tensor::from_f32("a", vec![2], vec![0.0; 2]).unwrap();
    let b = Tensor::from_i32("b", vec![2], vec![0; 2]).unwrap();
    assert!(matches!(
      tensor_diff(&a, &b),
      Err(DiffError::DTypeMismatch { .. })
    ));
  }

  #[test]
  fn tensor_self_diff_is_zero() {
    let t = Tensor::from_f32("t", vec![3], vec![0.25, -1.5, 3.0]).unwrap();
    assert_eq!(tensor_diff(&t, &t).unwrap(), DiffStatis::ZERO);
  }
}
