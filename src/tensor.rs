// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/tensor.rs - 张量定义
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
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
  #[error("张量 '{name}' 的形状 {shape:?} 需要 {expected} 个元素, 实际提供 {actual} 个")]
  ShapeMismatch {
    name: String,
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
  #[error("未知的张量元素类型: {0}")]
  UnknownDType(String),
}

/// 张量元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
  F32,
  I32,
}

impl fmt::Display for DType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DType::F32 => write!(f, "f32"),
      DType::I32 => write!(f, "i32"),
    }
  }
}

impl FromStr for DType {
  type Err = TensorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "f32" => Ok(DType::F32),
      "i32" => Ok(DType::I32),
      other => Err(TensorError::UnknownDType(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  F32(Vec<f32>),
  I32(Vec<i32>),
}

impl TensorData {
  pub fn len(&self) -> usize {
    match self {
      TensorData::F32(v) => v.len(),
      TensorData::I32(v) => v.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn dtype(&self) -> DType {
    match self {
      TensorData::F32(_) => DType::F32,
      TensorData::I32(_) => DType::I32,
    }
  }

  pub fn to_f64_vec(&self) -> Vec<f64> {
    match self {
      TensorData::F32(v) => v.iter().map(|&x| x as f64).collect(),
      TensorData::I32(v) => v.iter().map(|&x| x as f64).collect(),
    }
  }
}

/// 命名的多维数值缓冲区。
/// 不变量：缓冲区长度等于形状各维的乘积，构造时检查。
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  name: String,
  shape: Vec<usize>,
  data: TensorData,
}

impl Tensor {
  pub fn from_f32(
    name: impl Into<String>,
    shape: Vec<usize>,
    data: Vec<f32>,
  ) -> Result<Self, TensorError> {
    Self::new(name.into(), shape, TensorData::F32(data))
  }

  pub fn from_i32(
    name: impl Into<String>,
    shape: Vec<usize>,
    data: Vec<i32>,
  ) -> Result<Self, TensorError> {
    Self::new(name.into(), shape, TensorData::I32(data))
  }

  fn new(name: String, shape: Vec<usize>, data: TensorData) -> Result<Self, TensorError> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
      return Err(TensorError::ShapeMismatch {
        name,
        shape,
        expected,
        actual: data.len(),
      });
    }
    Ok(Tensor { name, shape, data })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn dtype(&self) -> DType {
    self.data.dtype()
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }

  pub fn numel(&self) -> usize {
    self.data.len()
  }

  /// 以 f32 切片访问数据，非 f32 张量返回 None
  pub fn as_f32(&self) -> Option<&[f32]> {
    match &self.data {
      TensorData::F32(v) => Some(v),
      _ => None,
    }
  }

  pub fn as_i32(&self) -> Option<&[i32]> {
    match &self.data {
      TensorData::I32(v) => Some(v),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shape_product_must_match_buffer_length() {
    let err = Tensor::from_f32("t", vec![2, 3], vec![0.0; 5]).unwrap_err();
    match err {
      TensorError::ShapeMismatch {
        expected, actual, ..
      } => {
        assert_eq!(expected, 6);
        assert_eq!(actual, 5);
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn valid_tensor_reports_shape_and_dtype() {
    let t = Tensor::from_i32("labels", vec![4], vec![1, 2, 3, 4]).unwrap();
    assert_eq!(t.shape(), &[4]);
    assert_eq!(t.dtype(), DType::I32);
    assert_eq!(t.numel(), 4);
    assert!(t.as_f32().is_none());
    assert_eq!(t.as_i32().unwrap(), &[1, 2, 3, 4]);
  }

  #[test]
  fn dtype_round_trips_through_str() {
    for dtype in [DType::F32, DType::I32] {
      assert_eq!(dtype.to_string().parse::<DType>().unwrap(), dtype);
    }
    assert!("f16".parse::<DType>().is_err());
  }
}
