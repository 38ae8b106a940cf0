// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/profile.rs - 延迟剖析
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
use std::time::{Duration, Instant};

use tracing::debug;

/// 重复计时得到的延迟统计，单位毫秒
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStatis {
  pub mean_ms: f64,
  pub median_ms: f64,
  pub min_ms: f64,
  pub max_ms: f64,
  pub iterations: usize,
}

impl LatencyStatis {
  /// 空采样返回全零，避免除零
  pub fn from_samples(samples: &[Duration]) -> Self {
    if samples.is_empty() {
      return LatencyStatis {
        mean_ms: 0.0,
        median_ms: 0.0,
        min_ms: 0.0,
        max_ms: 0.0,
        iterations: 0,
      };
    }

    let mut millis: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1e3).collect();
    millis.sort_by(|a, b| a.total_cmp(b));

    let sum: f64 = millis.iter().sum();
    let mid = millis.len() / 2;
    let median = if millis.len() % 2 == 0 {
      (millis[mid - 1] + millis[mid]) / 2.0
    } else {
      millis[mid]
    };

    LatencyStatis {
      mean_ms: sum / millis.len() as f64,
      median_ms: median,
      min_ms: millis[0],
      max_ms: millis[millis.len() - 1],
      iterations: millis.len(),
    }
  }
}

impl fmt::Display for LatencyStatis {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "mean={:.3}ms, median={:.3}ms, min={:.3}ms, max={:.3}ms ({} 次)",
      self.mean_ms, self.median_ms, self.min_ms, self.max_ms, self.iterations
    )
  }
}

/// 先预热再计时的剖析器
#[derive(Debug, Clone, Copy)]
pub struct Profiler {
  pub warmup: usize,
  pub repeat: usize,
}

impl Profiler {
  pub fn new(warmup: usize, repeat: usize) -> Self {
    Profiler { warmup, repeat }
  }

  /// 预热 `warmup` 次后计时执行 `repeat` 次。
  /// 任何一次执行失败立即向上返回，不做重试。
  pub fn measure<T, E, F>(&self, mut run: F) -> Result<LatencyStatis, E>
  where
    F: FnMut() -> Result<T, E>,
  {
    for index in 0..self.warmup {
      run()?;
      debug!("预热 {}/{}", index + 1, self.warmup);
    }

    let mut samples = Vec::with_capacity(self.repeat);
    for index in 0..self.repeat {
      let start = Instant::now();
      run()?;
      let elapsed = start.elapsed();
      debug!("计时 {}/{}: {:.2?}", index + 1, self.repeat, elapsed);
      samples.push(elapsed);
    }

    Ok(LatencyStatis::from_samples(&samples))
  }
}
