// 该文件是 Hengshan （衡山秤星） 项目的一部分。
// src/model/picodet.rs - PicoDet 风格的参考检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{Backend, ModelArtifacts};
use crate::config::load_config_map;
use crate::model::{DetectItem, DetectModel, DetectResult};
use crate::tensor::{Tensor, TensorError};

const PICODET_INPUT_SIZE: u32 = 320;
const PICODET_GRID: usize = 10;
const PICODET_NUM_CELLS: usize = PICODET_GRID * PICODET_GRID;
const PICODET_CLASS_NUM: usize = 80;
const PICODET_SCORE_THRESH: f32 = 0.5;
const PICODET_NMS_IOU: f32 = 0.5;
// 常用的 ImageNet 归一化参数
const PICODET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const PICODET_STD: [f32; 3] = [0.229, 0.224, 0.225];

const SCALE_FACTOR_NAME: &str = "scale_factor";

#[derive(Error, Debug)]
pub enum PicoDetError {
  #[error("模型加载错误 {path}: {source}")]
  ModelLoad {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("模型输入无效: {0}")]
  InvalidInput(String),
  #[error("模型输出无效: {0}")]
  InvalidOutput(String),
  #[error(transparent)]
  Tensor(#[from] TensorError),
}

pub struct PicoDetBuilder {
  artifacts: ModelArtifacts,
  nms: bool,
  score_threshold: f32,
}

impl PicoDetBuilder {
  pub fn from_artifacts(artifacts: &ModelArtifacts) -> Self {
    PicoDetBuilder {
      artifacts: artifacts.clone(),
      nms: true,
      score_threshold: PICODET_SCORE_THRESH,
    }
  }

  /// 后处理是否执行 NMS
  pub fn with_nms(mut self, nms: bool) -> Self {
    self.nms = nms;
    self
  }

  pub fn score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn build(self) -> Result<PicoDet, PicoDetError> {
    info!("加载模型文件: {}", self.artifacts.model_file.display());
    let model_bytes =
      std::fs::read(&self.artifacts.model_file).map_err(|source| PicoDetError::ModelLoad {
        path: self.artifacts.model_file.clone(),
        source,
      })?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_bytes.len() as f64 / (1024.0 * 1024.0)
    );

    let mut seed = fold_bytes(FNV_OFFSET, &model_bytes);
    if let Some(params_file) = &self.artifacts.params_file {
      let params_bytes = std::fs::read(params_file).map_err(|source| PicoDetError::ModelLoad {
        path: params_file.clone(),
        source,
      })?;
      debug!(
        "参数文件大小: {:.2} MB",
        params_bytes.len() as f64 / (1024.0 * 1024.0)
      );
      seed = fold_bytes(seed, &params_bytes);
    }

    let mut score_threshold = self.score_threshold;
    let mut input_size = PICODET_INPUT_SIZE;
    if self.artifacts.config_file.exists() {
      match load_config_map(&self.artifacts.config_file) {
        Ok(map) => {
          if let Some(value) = map.get("score_threshold")
            && let Ok(parsed) = value.parse()
          {
            score_threshold = parsed;
          }
          if let Some(value) = map.get("target_size")
            && let Ok(parsed) = value.parse::<u32>()
            && parsed >= PICODET_GRID as u32
          {
            input_size = parsed;
          }
        }
        Err(e) => warn!("推理配置文件解析失败, 使用默认值: {}", e),
      }
    } else {
      debug!(
        "推理配置文件 {} 不存在, 使用默认值",
        self.artifacts.config_file.display()
      );
    }

    info!(
      "模型加载完成: 后端={}, 输入尺寸={}, 分数阈值={}, NMS={}",
      self.artifacts.backend, input_size, score_threshold, self.nms
    );

    Ok(PicoDet {
      backend: self.artifacts.backend,
      input_order: self.artifacts.input_order,
      output_order: self.artifacts.output_order,
      input_size,
      score_threshold,
      nms: self.nms,
      class_weights: head_weights(seed),
    })
  }
}

/// 确定性的 PicoDet 风格检测模型。
/// 检测头的权重由模型文件字节折叠出的种子展开，
/// 同一组模型文件与同一张输入图像必然产生完全相同的输出。
#[derive(Debug)]
pub struct PicoDet {
  backend: Backend,
  input_order: &'static [&'static str],
  output_order: &'static [&'static str],
  input_size: u32,
  score_threshold: f32,
  nms: bool,
  class_weights: Box<[f32]>,
}

impl PicoDet {
  pub fn backend(&self) -> Backend {
    self.backend
  }

  pub fn input_size(&self) -> u32 {
    self.input_size
  }
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fold_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
  for &byte in bytes {
    hash ^= byte as u64;
    hash = hash.wrapping_mul(FNV_PRIME);
  }
  hash
}

fn splitmix64(state: &mut u64) -> u64 {
  *state = state.wrapping_add(0x9e3779b97f4a7c15);
  let mut z = *state;
  z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
  z ^ (z >> 31)
}

/// 每个类别四个权重，取值 [-1, 1]
fn head_weights(seed: u64) -> Box<[f32]> {
  let mut state = seed;
  (0..PICODET_CLASS_NUM * 4)
    .map(|_| {
      let unit = (splitmix64(&mut state) >> 11) as f64 / (1u64 << 53) as f64;
      (unit * 2.0 - 1.0) as f32
    })
    .collect()
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = ix * iy;
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 同类贪心 NMS。排序按分数降序、序号升序，结果与输入顺序无关紧要但完全确定。
fn hard_nms(items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  let mut order: Vec<usize> = (0..items.len()).collect();
  order.sort_by(|&a, &b| items[b].score.total_cmp(&items[a].score).then(a.cmp(&b)));

  let mut suppressed = vec![false; items.len()];
  let mut keep = Vec::with_capacity(items.len());
  for (position, &index) in order.iter().enumerate() {
    if suppressed[index] {
      continue;
    }
    keep.push(items[index]);
    for &other in &order[position + 1..] {
      if suppressed[other] || items[other].label_id != items[index].label_id {
        continue;
      }
      if iou(&items[index].bbox, &items[other].bbox) > iou_threshold {
        suppressed[other] = true;
      }
    }
  }
  keep
}

impl DetectModel for PicoDet {
  type Error = PicoDetError;

  /// 缩放到固定输入尺寸并做均值方差归一化，输出 NCHW 的 image 张量
  /// 与 [scale_h, scale_w] 的 scale_factor 张量。
  /// 历史流水线还会构造 im_shape 张量，但推理图并不消费它，这里不再构造。
  fn preprocess(&self, image: &RgbImage) -> Result<Vec<Tensor>, Self::Error> {
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 {
      return Err(PicoDetError::InvalidInput("输入图像为空".to_string()));
    }

    let size = self.input_size;
    let resized = image::imageops::resize(image, size, size, image::imageops::FilterType::Triangle);

    let side = size as usize;
    let plane = side * side;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
      let index = y as usize * side + x as usize;
      for c in 0..3 {
        data[c * plane + index] = (pixel[c] as f32 / 255.0 - PICODET_MEAN[c]) / PICODET_STD[c];
      }
    }

    let image_tensor = Tensor::from_f32(self.input_order[0], vec![1, 3, side, side], data)?;
    let scale_factor = Tensor::from_f32(
      SCALE_FACTOR_NAME,
      vec![1, 2],
      vec![size as f32 / src_h as f32, size as f32 / src_w as f32],
    )?;

    debug!(
      "预处理完成: {}x{} -> {}x{}",
      src_w, src_h, size, size
    );

    Ok(vec![image_tensor, scale_factor])
  }

  /// 检测头：逐网格单元统计颜色均值与亮度起伏，与种子权重混合出
  /// 每类分数；框坐标经 scale_factor 还原到原图尺度。
  fn infer(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, Self::Error> {
    let image = inputs
      .iter()
      .find(|t| t.name() == self.input_order[0])
      .ok_or_else(|| {
        PicoDetError::InvalidInput(format!("缺少输入张量 {}", self.input_order[0]))
      })?;
    let scale_factor = inputs
      .iter()
      .find(|t| t.name() == SCALE_FACTOR_NAME)
      .ok_or_else(|| {
        PicoDetError::InvalidInput(format!("缺少输入张量 {SCALE_FACTOR_NAME}"))
      })?;

    let side = self.input_size as usize;
    if image.shape() != [1, 3, side, side] {
      return Err(PicoDetError::InvalidInput(format!(
        "image 张量形状异常: {:?}",
        image.shape()
      )));
    }
    let data = image
      .as_f32()
      .ok_or_else(|| PicoDetError::InvalidInput("image 张量必须是 f32".to_string()))?;
    let scales = scale_factor
      .as_f32()
      .ok_or_else(|| PicoDetError::InvalidInput("scale_factor 张量必须是 f32".to_string()))?;
    if scales.len() != 2 {
      return Err(PicoDetError::InvalidInput(format!(
        "scale_factor 长度异常: {}",
        scales.len()
      )));
    }
    let (scale_h, scale_w) = (scales[0], scales[1]);

    let plane = side * side;
    let cell = side / PICODET_GRID;
    let cell_area = (cell * cell) as f32;

    let mut boxes = Vec::with_capacity(PICODET_NUM_CELLS * 4);
    let mut scores = Vec::with_capacity(PICODET_NUM_CELLS * PICODET_CLASS_NUM);

    for gy in 0..PICODET_GRID {
      for gx in 0..PICODET_GRID {
        // 单元区域的通道均值与亮度标准差
        let mut mean = [0f32; 3];
        let mut lum_sum = 0f32;
        let mut lum_sq_sum = 0f32;
        for y in gy * cell..(gy + 1) * cell {
          for x in gx * cell..(gx + 1) * cell {
            let index = y * side + x;
            let mut lum = 0f32;
            for c in 0..3 {
              let value = data[c * plane + index];
              mean[c] += value;
              lum += value;
            }
            lum /= 3.0;
            lum_sum += lum;
            lum_sq_sum += lum * lum;
          }
        }
        for channel in mean.iter_mut() {
          *channel /= cell_area;
        }
        let lum_mean = lum_sum / cell_area;
        let lum_std = (lum_sq_sum / cell_area - lum_mean * lum_mean).max(0.0).sqrt();

        for class in 0..PICODET_CLASS_NUM {
          let w = &self.class_weights[class * 4..class * 4 + 4];
          let logit = w[0] * mean[0] + w[1] * mean[1] + w[2] * mean[2] + w[3] * lum_std;
          scores.push(sigmoid(1.5 * logit - 1.0));
        }

        let cx = (gx as f32 + 0.5) * cell as f32 + (mean[0] - mean[1]) * cell as f32 * 0.25;
        let cy = (gy as f32 + 0.5) * cell as f32 + (mean[1] - mean[2]) * cell as f32 * 0.25;
        let half = cell as f32 * (0.45 + 0.35 * lum_std.tanh());
        let limit = side as f32;
        let x_min = (cx - half).clamp(0.0, limit);
        let y_min = (cy - half).clamp(0.0, limit);
        let x_max = (cx + half).clamp(0.0, limit);
        let y_max = (cy + half).clamp(0.0, limit);

        // 还原到原图坐标
        boxes.push(x_min / scale_w);
        boxes.push(y_min / scale_h);
        boxes.push(x_max / scale_w);
        boxes.push(y_max / scale_h);
      }
    }

    let boxes_tensor =
      Tensor::from_f32(self.output_order[0], vec![1, PICODET_NUM_CELLS, 4], boxes)?;
    let scores_tensor = Tensor::from_f32(
      self.output_order[1],
      vec![1, PICODET_NUM_CELLS, PICODET_CLASS_NUM],
      scores,
    )?;

    debug!("推理完成: {} 个候选单元", PICODET_NUM_CELLS);
    Ok(vec![boxes_tensor, scores_tensor])
  }

  fn postprocess(&self, outputs: &[Tensor]) -> Result<DetectResult, Self::Error> {
    if outputs.len() < 2 {
      return Err(PicoDetError::InvalidOutput(format!(
        "预期 2 个输出张量, 实际 {} 个",
        outputs.len()
      )));
    }

    let boxes = &outputs[0];
    let scores = &outputs[1];

    let &[_, anchors, four] = boxes.shape() else {
      return Err(PicoDetError::InvalidOutput(format!(
        "候选框张量形状异常: {:?}",
        boxes.shape()
      )));
    };
    if four != 4 {
      return Err(PicoDetError::InvalidOutput(format!(
        "候选框张量形状异常: {:?}",
        boxes.shape()
      )));
    }
    let &[_, score_anchors, classes] = scores.shape() else {
      return Err(PicoDetError::InvalidOutput(format!(
        "分数张量形状异常: {:?}",
        scores.shape()
      )));
    };
    if score_anchors != anchors {
      return Err(PicoDetError::InvalidOutput(format!(
        "候选框与分数的单元数不一致: {anchors} 与 {score_anchors}"
      )));
    }

    let box_data = boxes
      .as_f32()
      .ok_or_else(|| PicoDetError::InvalidOutput("候选框张量必须是 f32".to_string()))?;
    let score_data = scores
      .as_f32()
      .ok_or_else(|| PicoDetError::InvalidOutput("分数张量必须是 f32".to_string()))?;

    let mut items = Vec::new();
    for anchor in 0..anchors {
      let row = &score_data[anchor * classes..(anchor + 1) * classes];
      let (label, &score) = row
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .unwrap_or((0, &0.0));
      if score <= self.score_threshold {
        continue;
      }
      items.push(DetectItem {
        bbox: [
          box_data[anchor * 4],
          box_data[anchor * 4 + 1],
          box_data[anchor * 4 + 2],
          box_data[anchor * 4 + 3],
        ],
        label_id: label as i32,
        score,
      });
    }

    if self.nms {
      items = hard_nms(items, PICODET_NMS_IOU);
    }

    debug!("检测到 {} 个物体", items.len());

    let mut result = DetectResult::with_capacity(items.len());
    for item in items {
      result.push(item);
    }
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::Path;

  fn write_artifacts(dir: &Path) -> ModelArtifacts {
    std::fs::write(dir.join("model.mnn"), b"picodet reference weights").unwrap();
    Backend::Mnn.resolve_artifacts(dir, false)
  }

  fn test_image() -> RgbImage {
    RgbImage::from_fn(64, 48, |x, y| {
      image::Rgb([
        (x * 4 % 256) as u8,
        (y * 5 % 256) as u8,
        ((x + y) * 3 % 256) as u8,
      ])
    })
  }

  #[test]
  fn missing_model_file_fails_to_build() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = Backend::Mnn.resolve_artifacts(dir.path(), false);
    let err = PicoDetBuilder::from_artifacts(&artifacts).build().unwrap_err();
    assert!(matches!(err, PicoDetError::ModelLoad { .. }));
  }

  #[test]
  fn predict_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = write_artifacts(dir.path());
    let model = PicoDetBuilder::from_artifacts(&artifacts).build().unwrap();
    let image = test_image();

    let first = model.predict(&image).unwrap();
    let second = model.predict(&image).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn staged_pipeline_matches_predict() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = write_artifacts(dir.path());
    let model = PicoDetBuilder::from_artifacts(&artifacts).build().unwrap();
    let image = test_image();

    let inputs = model.preprocess(&image).unwrap();
    let outputs = model.infer(&inputs).unwrap();
    let staged = model.postprocess(&outputs).unwrap();
    let direct = model.predict(&image).unwrap();
    assert_eq!(staged, direct);
  }

  #[test]
  fn boxes_stay_within_source_image_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = write_artifacts(dir.path());
    let model = PicoDetBuilder::from_artifacts(&artifacts).build().unwrap();
    let image = test_image();

    let result = model.predict(&image).unwrap();
    for bbox in result.boxes() {
      assert!(bbox[0] >= 0.0 && bbox[2] <= 64.0 + 1e-3);
      assert!(bbox[1] >= 0.0 && bbox[3] <= 48.0 + 1e-3);
      assert!(bbox[0] <= bbox[2]);
      assert!(bbox[1] <= bbox[3]);
    }
  }

  #[test]
  fn config_file_overrides_score_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = write_artifacts(dir.path());
    std::fs::write(dir.path().join("infer_cfg.yml"), "score_threshold: 0.05\n").unwrap();
    let model = PicoDetBuilder::from_artifacts(&artifacts).build().unwrap();
    assert!((model.score_threshold - 0.05).abs() < 1e-6);
  }

  #[test]
  fn nms_collapses_overlapping_detections() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = write_artifacts(dir.path());
    let with_nms = PicoDetBuilder::from_artifacts(&artifacts).build().unwrap();
    let without_nms = PicoDetBuilder::from_artifacts(&artifacts)
      .with_nms(false)
      .build()
      .unwrap();

    let boxes = Tensor::from_f32(
      "tmp_16",
      vec![1, 2, 4],
      vec![10.0, 10.0, 50.0, 50.0, 12.0, 12.0, 52.0, 52.0],
    )
    .unwrap();
    let mut score_data = vec![0f32; 2 * PICODET_CLASS_NUM];
    score_data[3] = 0.9;
    score_data[PICODET_CLASS_NUM + 3] = 0.8;
    let scores = Tensor::from_f32(
      "concat_4.tmp_0",
      vec![1, 2, PICODET_CLASS_NUM],
      score_data,
    )
    .unwrap();
    let outputs = [boxes, scores];

    let suppressed = with_nms.postprocess(&outputs).unwrap();
    assert_eq!(suppressed.len(), 1);
    assert_eq!(suppressed.label_ids(), &[3]);

    let kept = without_nms.postprocess(&outputs).unwrap();
    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn different_artifacts_change_the_head() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    std::fs::write(dir_a.path().join("model.mnn"), b"weights a").unwrap();
    std::fs::write(dir_b.path().join("model.mnn"), b"weights b").unwrap();

    let model_a = PicoDetBuilder::from_artifacts(&Backend::Mnn.resolve_artifacts(dir_a.path(), false))
      .build()
      .unwrap();
    let model_b = PicoDetBuilder::from_artifacts(&Backend::Mnn.resolve_artifacts(dir_b.path(), false))
      .build()
      .unwrap();
    assert_ne!(model_a.class_weights, model_b.class_weights);
  }
}
