//! Reference & distorted video state.
use crate::metric::{Metric, MetricSample};
use serde::Serialize;
use std::path::PathBuf;

/// The video every distorted asset is compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub path: PathBuf,
}

/// Per-frame values of one metric for one asset.
///
/// Each metric keeps its own frame axis as ssim & psnr are computed by
/// separate ffmpeg runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricSeries {
    /// Whether a job for this metric has completed successfully.
    pub computed: bool,
    pub frames: Vec<u64>,
    pub values: Vec<f64>,
}

impl MetricSeries {
    pub fn push(&mut self, sample: &MetricSample) {
        self.frames.push(sample.frame);
        self.values.push(sample.all);
    }

    /// Clear any values & the computed flag, ready for a (re)run.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }
}

/// A distorted video to analyse.
#[derive(Debug, Clone, Serialize)]
pub struct DistortedAsset {
    pub path: PathBuf,
    pub ssim: MetricSeries,
    pub psnr: MetricSeries,
    /// Reserved, vmaf is never computed.
    pub vmaf_computed: bool,
    /// Frame count expected from a job, used for progress percent.
    #[serde(skip)]
    pub expected_frames: Option<u64>,
}

impl DistortedAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ssim: <_>::default(),
            psnr: <_>::default(),
            vmaf_computed: false,
            expected_frames: None,
        }
    }

    pub fn series(&self, metric: Metric) -> &MetricSeries {
        match metric {
            Metric::Ssim => &self.ssim,
            Metric::Psnr => &self.psnr,
        }
    }

    pub fn series_mut(&mut self, metric: Metric) -> &mut MetricSeries {
        match metric {
            Metric::Ssim => &mut self.ssim,
            Metric::Psnr => &mut self.psnr,
        }
    }

    pub fn is_computed(&self, metric: Metric) -> bool {
        self.series(metric).computed
    }

    /// Forget all results, e.g. after the reference changes.
    pub fn reset(&mut self) {
        for metric in Metric::ALL {
            self.series_mut(metric).reset();
        }
    }
}
