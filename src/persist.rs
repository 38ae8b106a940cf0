// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/persist.rs - 结果与张量的文本存取
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

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::model::{DetectItem, DetectResult};
use crate::tensor::{DType, Tensor, TensorData};

#[derive(Error, Debug)]
pub enum PersistError {
  #[error("{op}文件 {path} 失败: {source}")]
  Io {
    op: &'static str,
    path: PathBuf,
    source: io::Error,
  },
  #[error("解析文件 {path} 第 {line} 行失败: {reason}")]
  Parse {
    path: PathBuf,
    line: usize,
    reason: String,
  },
}

/// 解码失败的位置与原因，由 `load` 补上文件路径
#[derive(Debug)]
pub struct DecodeError {
  pub line: usize,
  pub reason: String,
}

impl DecodeError {
  fn new(line: usize, reason: impl Into<String>) -> Self {
    DecodeError {
      line,
      reason: reason.into(),
    }
  }
}

/// 可以落盘成稳定文本并无损读回的记录。
/// 浮点以固定六位小数写出，读回误差在声明容差之内。
pub trait TextRecord: Sized {
  fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()>;
  fn decode(text: &str) -> Result<Self, DecodeError>;
}

pub fn save<T: TextRecord>(value: &T, path: &Path) -> Result<(), PersistError> {
  let io_err = |source| PersistError::Io {
    op: "写入",
    path: path.to_path_buf(),
    source,
  };

  let file = File::create(path).map_err(io_err)?;
  let mut writer = BufWriter::new(file);
  value.encode(&mut writer).map_err(io_err)?;
  writer.flush().map_err(io_err)?;

  debug!("记录已写入 {}", path.display());
  Ok(())
}

pub fn load<T: TextRecord>(path: &Path) -> Result<T, PersistError> {
  let text = std::fs::read_to_string(path).map_err(|source| PersistError::Io {
    op: "读取",
    path: path.to_path_buf(),
    source,
  })?;
  T::decode(&text).map_err(|e| PersistError::Parse {
    path: path.to_path_buf(),
    line: e.line,
    reason: e.reason,
  })
}

/// 基准回归的固定套路：写盘、读回，返回读回的副本供对比。
pub fn round_trip<T: TextRecord>(value: &T, path: &Path) -> Result<T, PersistError> {
  save(value, path)?;
  load(path)
}

impl TextRecord for DetectResult {
  fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "detections: {}", self.len())?;
    for item in self.iter() {
      writeln!(
        writer,
        "{:.6} {:.6} {:.6} {:.6} {} {:.6}",
        item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3], item.label_id, item.score
      )?;
    }
    Ok(())
  }

  fn decode(text: &str) -> Result<Self, DecodeError> {
    let mut lines = text.lines().enumerate();

    let (_, header) = lines
      .next()
      .ok_or_else(|| DecodeError::new(1, "文件为空"))?;
    let count: usize = header
      .strip_prefix("detections: ")
      .ok_or_else(|| DecodeError::new(1, format!("缺少 detections 头: {header}")))?
      .parse()
      .map_err(|_| DecodeError::new(1, format!("检测数量无效: {header}")))?;

    let mut result = DetectResult::with_capacity(count);
    for _ in 0..count {
      let (index, line) = lines
        .next()
        .ok_or_else(|| DecodeError::new(count + 1, format!("检测行不足, 预期 {count} 行")))?;
      let line_no = index + 1;
      let fields: Vec<&str> = line.split_whitespace().collect();
      if fields.len() != 6 {
        return Err(DecodeError::new(
          line_no,
          format!("预期 6 个字段, 实际 {} 个", fields.len()),
        ));
      }
      let value = |i: usize| -> Result<f32, DecodeError> {
        fields[i]
          .parse()
          .map_err(|_| DecodeError::new(line_no, format!("数值无效: {}", fields[i])))
      };
      let label_id: i32 = fields[4]
        .parse()
        .map_err(|_| DecodeError::new(line_no, format!("标签无效: {}", fields[4])))?;
      result.push(DetectItem {
        bbox: [value(0)?, value(1)?, value(2)?, value(3)?],
        label_id,
        score: value(5)?,
      });
    }

    for (index, line) in lines {
      if !line.trim().is_empty() {
        return Err(DecodeError::new(index + 1, format!("多余的行: {line}")));
      }
    }

    Ok(result)
  }
}

impl TextRecord for Tensor {
  fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "name: {}", self.name())?;
    writeln!(writer, "dtype: {}", self.dtype())?;

    write!(writer, "shape:")?;
    for dim in self.shape() {
      write!(writer, " {dim}")?;
    }
    writeln!(writer)?;

    write!(writer, "data:")?;
    match self.data() {
      TensorData::F32(values) => {
        for value in values {
          write!(writer, " {value:.6}")?;
        }
      }
      TensorData::I32(values) => {
        for value in values {
          write!(writer, " {value}")?;
        }
      }
    }
    writeln!(writer)?;
    Ok(())
  }

  fn decode(text: &str) -> Result<Self, DecodeError> {
    let mut lines = text.lines();
    let mut field = |line_no: usize, prefix: &str| -> Result<String, DecodeError> {
      let line = lines
        .next()
        .ok_or_else(|| DecodeError::new(line_no, format!("缺少 {prefix} 行")))?;
      line
        .strip_prefix(prefix)
        .map(|rest| rest.trim_start().to_string())
        .ok_or_else(|| DecodeError::new(line_no, format!("预期 {prefix} 行, 实际: {line}")))
    };

    let name = field(1, "name:")?;
    let dtype: DType = field(2, "dtype:")?
      .parse()
      .map_err(|e| DecodeError::new(2, format!("{e}")))?;
    let shape = field(3, "shape:")?
      .split_whitespace()
      .map(|dim| {
        dim
          .parse::<usize>()
          .map_err(|_| DecodeError::new(3, format!("维度无效: {dim}")))
      })
      .collect::<Result<Vec<_>, _>>()?;
    let data_line = field(4, "data:")?;

    let tensor = match dtype {
      DType::F32 => {
        let values = data_line
          .split_whitespace()
          .map(|v| {
            v.parse::<f32>()
              .map_err(|_| DecodeError::new(4, format!("数值无效: {v}")))
          })
          .collect::<Result<Vec<_>, _>>()?;
        Tensor::from_f32(name, shape, values)
      }
      DType::I32 => {
        let values = data_line
          .split_whitespace()
          .map(|v| {
            v.parse::<i32>()
              .map_err(|_| DecodeError::new(4, format!("数值无效: {v}")))
          })
          .collect::<Result<Vec<_>, _>>()?;
        Tensor::from_i32(name, shape, values)
      }
    };

    tensor.map_err(|e| DecodeError::new(4, format!("{e}")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  fn sample_result() -> DetectResult {
    let mut result = DetectResult::new();
    result.push(DetectItem {
      bbox: [37.5, 42.25, 150.0, 260.5],
      label_id: 0,
      score: 0.9123,
    });
    result.push(DetectItem {
      bbox: [3.0, 4.0, 5.0, 6.0],
      label_id: 17,
      score: 0.5,
    });
    result
  }

  #[test]
  fn detect_result_round_trips_within_tolerance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("det_result.txt");
    let original = sample_result();

    let loaded = round_trip(&original, &path).unwrap();

    assert_eq!(loaded.len(), original.len());
    assert_eq!(loaded.label_ids(), original.label_ids());
    for (a, b) in original.boxes().iter().zip(loaded.boxes()) {
      for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-4);
      }
    }
    for (a, b) in original.scores().iter().zip(loaded.scores()) {
      assert!((a - b).abs() < 1e-4);
    }
  }

  #[test]
  fn empty_result_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("det_result.txt");
    let loaded = round_trip(&DetectResult::new(), &path).unwrap();
    assert!(loaded.is_empty());
  }

  #[test]
  fn tensor_round_trip_preserves_shape_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("det_tensor.txt");
    let original =
      Tensor::from_f32("tmp_16", vec![1, 2, 4], vec![0.1, -0.25, 3.5, 4.0, 5.5, 6.0, -7.125, 8.0])
        .unwrap();

    let loaded: Tensor = round_trip(&original, &path).unwrap();

    assert_eq!(loaded.name(), "tmp_16");
    assert_eq!(loaded.shape(), original.shape());
    assert_eq!(loaded.dtype(), original.dtype());
    for (a, b) in original
      .as_f32()
      .unwrap()
      .iter()
      .zip(loaded.as_f32().unwrap())
    {
      assert!((a - b).abs() < 1e-4);
    }
  }

  #[test]
  fn i32_tensor_round_trips_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.txt");
    let original = Tensor::from_i32("label", vec![3], vec![-1, 0, 42]).unwrap();
    let loaded: Tensor = round_trip(&original, &path).unwrap();
    assert_eq!(loaded, original);
  }

  #[test]
  fn malformed_content_reports_line_number() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.txt");
    std::fs::write(&path, "detections: 2\n1 2 3 4 0 0.5\nnot a detection\n").unwrap();

    let err = load::<DetectResult>(&path).unwrap_err();
    match err {
      PersistError::Parse { line, .. } => assert_eq!(line, 3),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn missing_file_reports_read_failure_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.txt");
    let err = load::<DetectResult>(&path).unwrap_err();
    match err {
      PersistError::Io { op, path: p, .. } => {
        assert_eq!(op, "读取");
        assert_eq!(p, path);
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn tensor_header_mismatch_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad_tensor.txt");
    std::fs::write(&path, "name: t\ndtype: f64\nshape: 1\ndata: 0.0\n").unwrap();
    assert!(matches!(
      load::<Tensor>(&path),
      Err(PersistError::Parse { line: 2, .. })
    ));
  }
}
