//! Per-step diagnostics: the record the trainer emits and the sinks that keep it

pub mod jsonl;

pub use jsonl::JsonlMonitor;

use anyhow::Result;
use mlx_rs::Array;
use std::collections::BTreeMap;

/// Scalars and images describing one training step
#[derive(Debug, Clone)]
pub struct MonitorRecord {
    pub step: usize,
    pub scalars: BTreeMap<String, f32>,
    pub images: BTreeMap<String, Array>,
}

impl MonitorRecord {
    pub fn new(step: usize) -> Self {
        Self {
            step,
            scalars: BTreeMap::new(),
            images: BTreeMap::new(),
        }
    }

    pub fn scalar(mut self, name: &str, value: f32) -> Self {
        self.scalars.insert(name.to_string(), value);
        self
    }

    pub fn image(mut self, name: &str, value: Array) -> Self {
        self.images.insert(name.to_string(), value);
        self
    }
}

/// Destination of monitoring records.
///
/// Emissions arrive in step order and are append-only; a sink decides how
/// much it retains.
pub trait MonitorSink {
    fn emit(&mut self, record: MonitorRecord) -> Result<()>;

    /// Flushes buffered output; called once on every exit path of a run
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: MonitorSink + ?Sized> MonitorSink for Box<S> {
    fn emit(&mut self, record: MonitorRecord) -> Result<()> {
        (**self).emit(record)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Keeps the scalars of the most recent records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<(usize, BTreeMap<String, f32>)>,
    capacity: Option<usize>,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retains at most `capacity` records, dropping the oldest
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn steps(&self) -> Vec<usize> {
        self.records.iter().map(|(step, _)| *step).collect()
    }

    pub fn records(&self) -> &[(usize, BTreeMap<String, f32>)] {
        &self.records
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl MonitorSink for MemorySink {
    fn emit(&mut self, record: MonitorRecord) -> Result<()> {
        if self.closed {
            anyhow::bail!("monitor sink is closed");
        }
        self.records.push((record.step, record.scalars));
        if let Some(capacity) = self.capacity {
            if self.records.len() > capacity {
                let excess = self.records.len() - capacity;
                self.records.drain(..excess);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_retention() {
        let mut sink = MemorySink::with_capacity_limit(2);
        for step in 1..=4 {
            sink.emit(MonitorRecord::new(step).scalar("psnr", step as f32))
                .unwrap();
        }
        assert_eq!(sink.steps(), vec![3, 4]);
        assert_eq!(sink.records()[1].1["psnr"], 4.0);

        sink.close().unwrap();
        assert!(sink.is_closed());
        assert!(sink.emit(MonitorRecord::new(5)).is_err());
    }
}
