// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/backend.rs - 推理后端与模型文件解析
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("不支持的推理后端: {0}")]
  Unsupported(String),
}

/// 模型文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
  Paddle,
  Mnn,
  Tnn,
  Ncnn,
}

impl fmt::Display for ModelFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelFormat::Paddle => write!(f, "PADDLE"),
      ModelFormat::Mnn => write!(f, "MNN"),
      ModelFormat::Tnn => write!(f, "TNN"),
      ModelFormat::Ncnn => write!(f, "NCNN"),
    }
  }
}

/// 推理后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
  /// 原生后端（默认）
  Paddle,
  Mnn,
  Tnn,
  Ncnn,
}

/// 各后端的文件名模板与张量顺序。
/// 新增后端时在表里补一行即可，不再展开分支。
struct BackendSpec {
  model_suffix: &'static str,
  quant_model_suffix: Option<&'static str>,
  params_suffix: Option<&'static str>,
  format: ModelFormat,
  input_order: &'static [&'static str],
  output_order: &'static [&'static str],
}

const PADDLE_SPEC: BackendSpec = BackendSpec {
  model_suffix: "model.pdmodel",
  quant_model_suffix: None,
  params_suffix: Some("model.pdiparams"),
  format: ModelFormat::Paddle,
  input_order: &["image", "scale_factor"],
  output_order: &["tmp_16", "concat_4.tmp_0"],
};

const MNN_SPEC: BackendSpec = BackendSpec {
  model_suffix: "model.mnn",
  quant_model_suffix: Some("model_quant.mnn"),
  params_suffix: None,
  format: ModelFormat::Mnn,
  input_order: &["image"],
  output_order: &["tmp_16", "concat_4.tmp_0"],
};

const TNN_SPEC: BackendSpec = BackendSpec {
  model_suffix: "model.opt.tnnmodel",
  quant_model_suffix: None,
  params_suffix: Some("model.opt.tnnproto"),
  format: ModelFormat::Tnn,
  input_order: &["image"],
  output_order: &["tmp_16", "concat_4.tmp_0"],
};

const NCNN_SPEC: BackendSpec = BackendSpec {
  model_suffix: "model.opt.bin",
  quant_model_suffix: None,
  params_suffix: Some("model.opt.param"),
  format: ModelFormat::Ncnn,
  input_order: &["image"],
  output_order: &["tmp_16", "concat_4.tmp_0"],
};

/// 推理配置文件名，所有后端共用
const INFER_CONFIG_FILE: &str = "infer_cfg.yml";

impl Backend {
  pub const ALL: [Backend; 4] = [Backend::Paddle, Backend::Mnn, Backend::Tnn, Backend::Ncnn];

  pub fn name(&self) -> &'static str {
    match self {
      Backend::Paddle => "paddle",
      Backend::Mnn => "mnn",
      Backend::Tnn => "tnn",
      Backend::Ncnn => "ncnn",
    }
  }

  fn spec(&self) -> &'static BackendSpec {
    match self {
      Backend::Paddle => &PADDLE_SPEC,
      Backend::Mnn => &MNN_SPEC,
      Backend::Tnn => &TNN_SPEC,
      Backend::Ncnn => &NCNN_SPEC,
    }
  }

  /// 由模型目录解析出该后端的模型文件组。
  /// 量化标志仅对提供量化模型的后端生效，其余后端忽略。
  pub fn resolve_artifacts(&self, model_dir: &Path, quant: bool) -> ModelArtifacts {
    let spec = self.spec();

    let model_suffix = match (quant, spec.quant_model_suffix) {
      (true, Some(suffix)) => suffix,
      _ => spec.model_suffix,
    };

    let artifacts = ModelArtifacts {
      backend: *self,
      model_file: model_dir.join(model_suffix),
      params_file: spec.params_suffix.map(|suffix| model_dir.join(suffix)),
      config_file: model_dir.join(INFER_CONFIG_FILE),
      format: spec.format,
      input_order: spec.input_order,
      output_order: spec.output_order,
    };

    debug!(
      "后端 {} 解析模型文件: {}, 参数文件: {:?}, 格式: {}",
      self.name(),
      artifacts.model_file.display(),
      artifacts.params_file,
      artifacts.format
    );

    artifacts
  }
}

impl fmt::Display for Backend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name())
  }
}

impl FromStr for Backend {
  type Err = BackendError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "paddle" | "default" => Ok(Backend::Paddle),
      "mnn" => Ok(Backend::Mnn),
      "tnn" => Ok(Backend::Tnn),
      "ncnn" => Ok(Backend::Ncnn),
      other => Err(BackendError::Unsupported(other.to_string())),
    }
  }
}

/// 解析完成的模型文件组，解析后不再变更
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
  pub backend: Backend,
  pub model_file: PathBuf,
  pub params_file: Option<PathBuf>,
  pub config_file: PathBuf,
  pub format: ModelFormat,
  pub input_order: &'static [&'static str],
  pub output_order: &'static [&'static str],
}
