// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/config.rs - 基准运行配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::backend::{Backend, BackendError};

const DEFAULT_WARMUP: usize = 20;
const DEFAULT_REPEAT: usize = 100;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取基准配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("基准配置文件 {path} 第 {line} 行格式错误: {content}")]
  Malformed {
    path: PathBuf,
    line: usize,
    content: String,
  },
  #[error("配置项 {key} 的值无效: {value}")]
  InvalidValue { key: &'static str, value: String },
  #[error(transparent)]
  Backend(#[from] BackendError),
}

/// 读取 `key: value` 格式的基准配置文件。
/// 空行与 `#` 开头的注释行跳过；值中允许再出现冒号。
pub fn load_config_map(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
  let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
    path: path.to_path_buf(),
    source,
  })?;

  let mut map = HashMap::new();
  for (index, raw) in text.lines().enumerate() {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let Some((key, value)) = line.split_once(':') else {
      return Err(ConfigError::Malformed {
        path: path.to_path_buf(),
        line: index + 1,
        content: raw.to_string(),
      });
    };
    map.insert(key.trim().to_string(), value.trim().to_string());
  }

  debug!("基准配置文件 {} 共 {} 项", path.display(), map.len());
  Ok(map)
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
  match value {
    "true" | "1" => Ok(true),
    "false" | "0" => Ok(false),
    other => Err(ConfigError::InvalidValue {
      key,
      value: other.to_string(),
    }),
  }
}

fn parse_count(key: &'static str, value: &str) -> Result<usize, ConfigError> {
  value.parse().map_err(|_| ConfigError::InvalidValue {
    key,
    value: value.to_string(),
  })
}

/// 一次基准运行的完整配置。
/// 启动时由命令行与配置文件合并构造，之后只读。
#[derive(Debug, Clone)]
pub struct BenchConfig {
  pub backend: Backend,
  pub precision_compare: bool,
  pub warmup: usize,
  pub repeat: usize,
  pub quant: bool,
  /// 后处理是否执行 NMS
  pub nms: bool,
  pub model_dir: PathBuf,
  pub image_path: PathBuf,
  pub font_path: Option<PathBuf>,
}

impl BenchConfig {
  /// 合并命令行与配置文件。命令行的 backend 覆盖配置文件的 `backend` 项。
  #[allow(clippy::too_many_arguments)]
  pub fn resolve(
    model_dir: PathBuf,
    image_path: PathBuf,
    config_path: &Path,
    backend_override: Option<&str>,
    no_nms: bool,
    quant: bool,
    font_path: Option<PathBuf>,
  ) -> Result<Self, ConfigError> {
    let map = load_config_map(config_path)?;

    let backend_name = backend_override
      .map(str::to_string)
      .or_else(|| map.get("backend").cloned())
      .unwrap_or_else(|| "paddle".to_string());
    let backend: Backend = backend_name.parse()?;

    let precision_compare = match map.get("precision_compare") {
      Some(value) => parse_bool("precision_compare", value)?,
      None => false,
    };
    let warmup = match map.get("warmup") {
      Some(value) => parse_count("warmup", value)?,
      None => DEFAULT_WARMUP,
    };
    let repeat = match map.get("repeat") {
      Some(value) => parse_count("repeat", value)?,
      None => DEFAULT_REPEAT,
    };

    let config = BenchConfig {
      backend,
      precision_compare,
      warmup,
      repeat,
      quant,
      nms: !no_nms,
      model_dir,
      image_path,
      font_path,
    };

    info!(
      "基准配置: 后端={}, 精度对比={}, 预热={}, 重复={}, 量化={}, NMS={}",
      config.backend,
      config.precision_compare,
      config.warmup,
      config.repeat,
      config.quant,
      config.nms
    );

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    (dir, path)
  }

  fn resolve(path: &Path, backend_override: Option<&str>) -> Result<BenchConfig, ConfigError> {
    BenchConfig::resolve(
      PathBuf::from("/m"),
      PathBuf::from("in.jpg"),
      path,
      backend_override,
      false,
      false,
      None,
    )
  }

  #[test]
  fn parses_key_value_lines_with_comments() {
    let (_dir, path) = write_config("# 注释\nbackend: mnn\n\nprecision_compare: true\nwarmup: 3\nrepeat: 7\n");
    let config = resolve(&path, None).unwrap();
    assert_eq!(config.backend, Backend::Mnn);
    assert!(config.precision_compare);
    assert_eq!(config.warmup, 3);
    assert_eq!(config.repeat, 7);
  }

  #[test]
  fn defaults_apply_when_keys_absent() {
    let (_dir, path) = write_config("backend: tnn\n");
    let config = resolve(&path, None).unwrap();
    assert!(!config.precision_compare);
    assert_eq!(config.warmup, DEFAULT_WARMUP);
    assert_eq!(config.repeat, DEFAULT_REPEAT);
  }

  #[test]
  fn cli_backend_overrides_config_file() {
    let (_dir, path) = write_config("backend: mnn\n");
    let config = resolve(&path, Some("ncnn")).unwrap();
    assert_eq!(config.backend, Backend::Ncnn);
  }

  #[test]
  fn unknown_backend_surfaces_backend_error() {
    let (_dir, path) = write_config("backend: openvino\n");
    let err = resolve(&path, None).unwrap_err();
    assert!(matches!(err, ConfigError::Backend(_)));
  }

  #[test]
  fn malformed_line_reports_line_number() {
    let (_dir, path) = write_config("backend: mnn\nthis is not a pair\n");
    let err = resolve(&path, None).unwrap_err();
    match err {
      ConfigError::Malformed { line, .. } => assert_eq!(line, 2),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn invalid_bool_is_rejected() {
    let (_dir, path) = write_config("precision_compare: maybe\n");
    let err = resolve(&path, None).unwrap_err();
    assert!(matches!(
      err,
      ConfigError::InvalidValue {
        key: "precision_compare",
        ..
      }
    ));
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = resolve(&dir.path().join("absent.txt"), None).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
  }
}
