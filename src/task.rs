// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/task.rs - 基准任务
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
use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::BenchConfig;
use crate::diff::{DetDiff, DiffError, DiffStatis, tensor_diff};
use crate::model::{DetectModel, DetectResult};
use crate::persist::{self, PersistError};
use crate::profile::{LatencyStatis, Profiler};

/// 每次运行覆盖写入的固定文件名
pub const DET_RESULT_FILE: &str = "det_result.txt";
pub const DET_TENSOR_FILE: &str = "det_tensor.txt";
pub const REPORT_FILE: &str = "benchmark_report.json";

#[derive(Error, Debug)]
pub enum BenchError {
  #[error("模型推理错误: {0}")]
  Model(Box<dyn std::error::Error + Send + Sync>),
  #[error(transparent)]
  Persist(#[from] PersistError),
  #[error("模型没有输出张量")]
  EmptyOutput,
}

/// 基准任务阶段，只会按声明顺序前进
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchStage {
  Initialized,
  Configured,
  Warmup,
  Comparison,
  Timed,
  Report,
  Done,
}

impl fmt::Display for BenchStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      BenchStage::Initialized => "初始化",
      BenchStage::Configured => "已配置",
      BenchStage::Warmup => "预热",
      BenchStage::Comparison => "精度对比",
      BenchStage::Timed => "计时",
      BenchStage::Report => "报告",
      BenchStage::Done => "完成",
    };
    write!(f, "{name}")
  }
}

/// 一次基准运行的产出
#[derive(Debug)]
pub struct BenchOutcome {
  pub detections: DetectResult,
  pub latency: LatencyStatis,
  pub det_diff: Option<DetDiff>,
  pub tensor_diff: Option<DiffStatis>,
  /// 对比阶段的形状不匹配不会中断计时阶段，记录在这里由上层决定退出码
  pub comparison_error: Option<DiffError>,
}

/// 顺序执行的基准任务。
/// 任何前置阶段失败都会立即返回，不再进入后续阶段。
pub struct BenchTask {
  stage: BenchStage,
  config: BenchConfig,
  output_dir: PathBuf,
  profiler: Profiler,
}

impl BenchTask {
  pub fn new(config: &BenchConfig) -> Self {
    BenchTask {
      stage: BenchStage::Initialized,
      config: config.clone(),
      output_dir: PathBuf::from("."),
      profiler: Profiler::new(config.warmup, config.repeat),
    }
  }

  /// 结果、张量与报告文件的输出目录，默认当前目录
  pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.output_dir = dir.into();
    self
  }

  fn advance(&mut self, next: BenchStage) {
    info!("阶段切换: {} -> {}", self.stage, next);
    self.stage = next;
  }

  pub fn run<M: DetectModel>(
    mut self,
    model: &M,
    image: &RgbImage,
  ) -> Result<BenchOutcome, BenchError> {
    let model_err = |e: M::Error| BenchError::Model(Box::new(e));

    self.advance(BenchStage::Configured);
    info!(
      "后端: {}, 预热 {} 次, 计时 {} 次, 精度对比: {}",
      self.config.backend, self.profiler.warmup, self.profiler.repeat, self.config.precision_compare
    );

    self.advance(BenchStage::Warmup);
    let detections = model.predict(image).map_err(model_err)?;
    info!("预热推理完成, 检测到 {} 个物体", detections.len());

    let mut det_diff = None;
    let mut raw_tensor_diff = None;
    let mut comparison_error = None;
    if self.config.precision_compare {
      self.advance(BenchStage::Comparison);

      info!("=============== 结果对比 ===============");
      let det_result_path = self.output_dir.join(DET_RESULT_FILE);
      let loaded = persist::round_trip(&detections, &det_result_path)?;
      match DetDiff::between(&detections, &loaded) {
        Ok(diff) => {
          info!("Boxes diff: {}", diff.boxes);
          info!("Label_ids diff: {}", diff.labels);
          info!("Scores diff: {}", diff.scores);
          det_diff = Some(diff);
        }
        Err(e) => {
          error!("结果对比失败: {}", e);
          comparison_error = Some(e);
        }
      }

      info!("=============== 张量对比 ===============");
      let inputs = model.preprocess(image).map_err(model_err)?;
      let outputs = model.infer(&inputs).map_err(model_err)?;
      model.postprocess(&outputs).map_err(model_err)?;
      let dump = outputs.into_iter().next().ok_or(BenchError::EmptyOutput)?;

      let det_tensor_path = self.output_dir.join(DET_TENSOR_FILE);
      let loaded_tensor = persist::round_trip(&dump, &det_tensor_path)?;
      match tensor_diff(&dump, &loaded_tensor) {
        Ok(diff) => {
          info!("Tensor diff: {}", diff);
          raw_tensor_diff = Some(diff);
        }
        Err(e) => {
          error!("张量对比失败: {}", e);
          comparison_error = Some(e);
        }
      }
    }

    self.advance(BenchStage::Timed);
    let latency = self.profiler.measure(|| model.predict(image)).map_err(model_err)?;
    info!("推理延迟: {}", latency);

    self.advance(BenchStage::Report);
    let outcome = BenchOutcome {
      detections,
      latency,
      det_diff,
      tensor_diff: raw_tensor_diff,
      comparison_error,
    };
    self.write_report(&outcome);

    self.advance(BenchStage::Done);
    Ok(outcome)
  }

  /// 机器可读的运行报告。写入失败只告警，不影响基准结果。
  fn write_report(&self, outcome: &BenchOutcome) {
    fn statis_json(statis: &DiffStatis) -> serde_json::Value {
      serde_json::json!({
        "mean": statis.mean,
        "min": statis.min,
        "max": statis.max,
      })
    }

    let report = serde_json::json!({
      "timestamp": chrono::Utc::now().to_rfc3339(),
      "backend": self.config.backend.name(),
      "quant": self.config.quant,
      "nms": self.config.nms,
      "warmup": self.profiler.warmup,
      "repeat": self.profiler.repeat,
      "detections": outcome.detections.len(),
      "latency_ms": {
        "mean": outcome.latency.mean_ms,
        "median": outcome.latency.median_ms,
        "min": outcome.latency.min_ms,
        "max": outcome.latency.max_ms,
      },
      "det_diff": outcome.det_diff.as_ref().map(|diff| serde_json::json!({
        "boxes": statis_json(&diff.boxes),
        "labels": statis_json(&diff.labels),
        "scores": statis_json(&diff.scores),
      })),
      "tensor_diff": outcome.tensor_diff.as_ref().map(statis_json),
      "comparison_error": outcome.comparison_error.as_ref().map(|e| e.to_string()),
    });

    let path = self.output_dir.join(REPORT_FILE);
    match serde_json::to_string_pretty(&report) {
      Ok(text) => {
        if let Err(e) = std::fs::write(&path, text) {
          warn!("写入报告 {} 失败: {}", path.display(), e);
        } else {
          info!("运行报告已写入 {}", path.display());
        }
      }
      Err(e) => warn!("序列化报告失败: {}", e),
    }
  }
}
