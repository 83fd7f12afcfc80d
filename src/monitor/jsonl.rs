//! JSON-lines monitoring sink with periodic image dumps

use super::{MonitorRecord, MonitorSink};
use crate::checkpoints::mlx_utils::{f32_to_le_bytes, to_flat};
use anyhow::{Context, Result};
use safetensors::tensor::TensorView;
use safetensors::Dtype;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::MonitorConfig;

pub const METRICS_FILE: &str = "metrics.jsonl";
const IMAGES_DIR: &str = "images";

/// Writes one JSON line per record to `<dir>/metrics.jsonl` and, every
/// `image_interval` steps, the record's images to
/// `<dir>/images/step-<step>-<seq>.safetensors`.
///
/// `seq` counts emissions across the lifetime of the log directory, so two
/// records for the same step never share a file.
pub struct JsonlMonitor {
    dir: PathBuf,
    writer: Option<BufWriter<File>>,
    image_interval: usize,
    max_image_files: usize,
    image_files: VecDeque<PathBuf>,
    seq: u64,
}

impl JsonlMonitor {
    pub fn new(dir: &Path, config: &MonitorConfig) -> Result<Self> {
        let images_dir = dir.join(IMAGES_DIR);
        fs::create_dir_all(&images_dir)
            .with_context(|| format!("Failed to create log directory {}", images_dir.display()))?;

        let metrics_path = dir.join(METRICS_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&metrics_path)
            .with_context(|| format!("Failed to open {}", metrics_path.display()))?;

        let mut existing = existing_image_files(&images_dir)?;
        existing.sort_by_key(|(seq, _)| *seq);
        let seq = existing.last().map(|(seq, _)| seq + 1).unwrap_or(0);

        Ok(Self {
            dir: dir.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            image_interval: config.image_interval,
            max_image_files: config.max_image_files,
            image_files: existing.into_iter().map(|(_, path)| path).collect(),
            seq,
        })
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.dir.join(METRICS_FILE)
    }

    fn write_images(&mut self, record: &MonitorRecord) -> Result<()> {
        let mut buffers = Vec::with_capacity(record.images.len());
        for (name, image) in &record.images {
            let (data, shape) = to_flat(image)?;
            let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            buffers.push((name.clone(), shape, f32_to_le_bytes(&data)));
        }

        let mut views = Vec::with_capacity(buffers.len());
        for (name, shape, bytes) in &buffers {
            views.push((name.clone(), TensorView::new(Dtype::F32, shape.clone(), bytes)?));
        }

        let path = self
            .dir
            .join(IMAGES_DIR)
            .join(format!("step-{}-{}.safetensors", record.step, self.seq));
        safetensors::serialize_to_file(views, &None, &path)
            .with_context(|| format!("Failed to write images to {}", path.display()))?;
        self.image_files.push_back(path);

        while self.image_files.len() > self.max_image_files {
            if let Some(old) = self.image_files.pop_front() {
                if old.exists() {
                    fs::remove_file(&old)
                        .with_context(|| format!("Failed to remove {}", old.display()))?;
                }
            }
        }
        Ok(())
    }
}

/// `(seq, path)` of image files left by earlier runs
fn existing_image_files(images_dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(images_dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let seq = name
            .strip_prefix("step-")
            .and_then(|rest| rest.strip_suffix(".safetensors"))
            .and_then(|rest| rest.rsplit_once('-'))
            .and_then(|(_, seq)| seq.parse::<u64>().ok());
        if let Some(seq) = seq {
            files.push((seq, entry.path()));
        }
    }
    Ok(files)
}

fn image_summary(image: &mlx_rs::Array) -> Result<serde_json::Value> {
    let (data, shape) = to_flat(image)?;
    let (min, max, sum) = data.iter().fold(
        (f32::INFINITY, f32::NEG_INFINITY, 0.0_f64),
        |(min, max, sum), &v| (min.min(v), max.max(v), sum + v as f64),
    );
    let mean = if data.is_empty() {
        0.0
    } else {
        sum / data.len() as f64
    };
    Ok(serde_json::json!({
        "shape": shape,
        "min": min,
        "max": max,
        "mean": mean,
    }))
}

impl MonitorSink for JsonlMonitor {
    fn emit(&mut self, record: MonitorRecord) -> Result<()> {
        let mut images = serde_json::Map::new();
        for (name, image) in &record.images {
            images.insert(name.clone(), image_summary(image)?);
        }

        let line = serde_json::json!({
            "step": record.step,
            "seq": self.seq,
            "scalars": record.scalars,
            "images": images,
        });

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("monitor for {} is closed", self.dir.display()))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;

        if self.image_interval > 0
            && record.step % self.image_interval == 0
            && !record.images.is_empty()
        {
            self.write_images(&record)?;
        }

        self.seq += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for JsonlMonitor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
