//! ssim & psnr stats line parsing
use serde::Serialize;
use std::fmt;

/// Value stored in place of an infinite psnr, i.e. identical frames.
pub const PSNR_INFINITE: f64 = 100.0;

/// Quality metric computed by a single ffmpeg job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Ssim,
    Psnr,
}

impl Metric {
    /// Dispatch precedence, all ssim jobs run before any psnr job.
    pub const ALL: [Self; 2] = [Self::Ssim, Self::Psnr];

    /// ffmpeg filter name.
    pub fn filter(self) -> &'static str {
        match self {
            Self::Ssim => "ssim",
            Self::Psnr => "psnr",
        }
    }

    /// ffmpeg `-lavfi` value writing per-frame stats to stdout.
    pub fn lavfi(self) -> String {
        format!("{}=stats_file=-", self.filter())
    }

    pub fn parse_line(self, line: &str) -> Option<MetricSample> {
        match self {
            Self::Ssim => parse_ssim(line),
            Self::Psnr => parse_psnr(line),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssim => "SSIM".fmt(f),
            Self::Psnr => "PSNR".fmt(f),
        }
    }
}

/// One frame of metric output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub frame: u64,
    pub y: f64,
    pub u: f64,
    pub v: f64,
    /// Aggregate value, this is what gets plotted.
    pub all: f64,
}

// E.g. "n:1 Y:0.995732 U:0.993425 V:0.992781 All:0.994842 (22.875428)"
pub fn parse_ssim(line: &str) -> Option<MetricSample> {
    const LABELS: [&str; 5] = ["n:", "Y:", "U:", "V:", "All:"];

    let [n, y, u, v, all] = labelled_tokens(line, LABELS)?;
    Some(MetricSample {
        frame: n.parse().ok()?,
        y: finite(y)?,
        u: finite(u)?,
        v: finite(v)?,
        all: finite(all)?,
    })
}

// E.g. "n:1 mse_avg:2.75 mse_y:3.41 mse_u:1.52 mse_v:1.35 psnr_avg:43.74 psnr_y:42.81 psnr_u:46.32 psnr_v:46.82"
pub fn parse_psnr(line: &str) -> Option<MetricSample> {
    const LABELS: [&str; 9] = [
        "n:", "mse_avg:", "mse_y:", "mse_u:", "mse_v:", "psnr_avg:", "psnr_y:", "psnr_u:",
        "psnr_v:",
    ];

    let [n, mse @ .., avg, y, u, v] = labelled_tokens(line, LABELS)?;
    for m in mse {
        finite(m)?;
    }
    Some(MetricSample {
        frame: n.parse().ok()?,
        y: psnr(y)?,
        u: psnr(u)?,
        v: psnr(v)?,
        all: psnr(avg)?,
    })
}

/// Parse encoding speed from a ffmpeg progress line, e.g. "frame=  288 fps= 94 q=-0.0 ...".
pub fn parse_fps(line: &str) -> Option<f32> {
    const LABEL: &str = "fps=";

    let tail = line[line.find(LABEL)? + LABEL.len()..].trim_start();
    let end = tail
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(idx, _)| idx)
        .unwrap_or(tail.len());
    let fps: f32 = tail[..end].parse().ok()?;
    fps.is_finite().then_some(fps)
}

/// Find `labels` as consecutive whitespace separated tokens & return the values after each label.
fn labelled_tokens<'a, const N: usize>(line: &'a str, labels: [&str; N]) -> Option<[&'a str; N]> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens.windows(N).find_map(|window| {
        let mut values = [""; N];
        for ((value, token), label) in values.iter_mut().zip(window).zip(labels) {
            *value = token.strip_prefix(label)?;
        }
        Some(values)
    })
}

fn finite(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// A psnr value, infinity is clamped to [`PSNR_INFINITE`] & nan rejected.
fn psnr(token: &str) -> Option<f64> {
    match token.parse::<f64>().ok()? {
        f if f == f64::INFINITY => Some(PSNR_INFINITE),
        f if f.is_finite() => Some(f),
        _ => None,
    }
}
