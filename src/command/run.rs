use crate::{
    asset::DistortedAsset,
    command::PROGRESS_CHARS,
    job::{DEFAULT_TIME_LIMIT_S, JobRunner},
    log::{LogInterval, ProgressLogger},
    metric::Metric,
    probe,
    process::FfmpegLauncher,
    scheduler::{Scheduler, State},
    sink::SeriesSink,
};
use anyhow::anyhow;
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::signal;

/// SSIM & PSNR of distorted videos vs a reference video, one ffmpeg job at a time.
///
/// SSIM is computed for every distorted video, in the given order, before any PSNR.
/// Prints per-video frame counts, mean & min scores.
#[derive(Parser)]
#[clap(verbatim_doc_comment)]
#[group(skip)]
pub struct Args {
    /// Reference video file.
    #[arg(short, long)]
    pub reference: PathBuf,

    /// Distorted video file(s). May be specified multiple times.
    #[arg(short, long, required = true)]
    pub distorted: Vec<PathBuf>,

    /// ffmpeg executable.
    #[arg(long, default_value = "ffmpeg", env = "VQCOMPARE_FFMPEG")]
    pub ffmpeg: PathBuf,

    /// Seconds of each video to analyse.
    #[arg(long, default_value_t = DEFAULT_TIME_LIMIT_S)]
    pub time_limit: u32,

    /// Frames each job is expected to analyse, used for progress.
    /// By default estimated using ffprobe.
    #[arg(long)]
    pub expected_frames: Option<u64>,

    /// Progress log interval for non-interactive use, e.g. "30s" or "5%".
    /// By default logs after 16s, 32s, 64s etc.
    #[arg(long)]
    pub log_interval: Option<LogInterval>,

    /// Print every per-frame series as json instead of the summary.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(
    Args {
        reference,
        distorted,
        ffmpeg,
        time_limit,
        expected_frames,
        log_interval,
        json,
    }: Args,
) -> anyhow::Result<()> {
    let bar = ProgressBar::new(100).with_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan.bold} {elapsed_precise:.bold} {prefix} {wide_bar:.cyan/blue} ({msg}eta {eta})")?
            .progress_chars(PROGRESS_CHARS)
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    let names = distorted.iter().map(|p| file_name(p)).collect();
    let sink = BarSink::new(bar, names, log_interval);
    let runner = JobRunner::new(FfmpegLauncher::new(ffmpeg), time_limit);
    let mut scheduler = Scheduler::new(runner, sink);

    scheduler.set_reference(&reference)?;
    let time_limit = Duration::from_secs(time_limit.into());
    for path in distorted {
        let index = scheduler.add_asset(&path)?;
        let frames = match expected_frames {
            Some(frames) => Some(frames),
            None => probe::probe(&path)
                .expected_frames(time_limit)
                .inspect_err(|err| debug!("{}: unknown frame count, {err}", path.display()))
                .ok(),
        };
        if let Some(asset) = scheduler.asset_mut(index) {
            asset.expected_frames = frames;
        }
    }

    scheduler.start()?;
    tokio::select! {
        _ = scheduler.run() => {}
        _ = signal::ctrl_c() => scheduler.stop().await,
    }
    scheduler.sink().finish(scheduler.state() == State::AllDone);

    match json {
        true => println!(
            "{}",
            serde_json::to_string_pretty(&Report {
                reference: &reference,
                distorted: scheduler.assets(),
            })?
        ),
        false => print_summary(scheduler.assets()),
    }

    match scheduler.state() {
        State::AllDone => Ok(()),
        State::Stopped => Err(anyhow!("ctrl_c")),
        _ => Err(anyhow!("a job failed, remaining jobs were not run")),
    }
}

#[derive(Serialize)]
struct Report<'a> {
    reference: &'a Path,
    distorted: &'a [DistortedAsset],
}

fn print_summary(assets: &[DistortedAsset]) {
    for asset in assets {
        println!("{}", style(asset.path.display()).bold());
        for metric in Metric::ALL {
            let series = asset.series(metric);
            match (series.mean(), series.min()) {
                (Some(mean), Some(min)) => println!(
                    "  {metric} {} frames, mean {}, min {}{}",
                    series.values.len(),
                    style(format!("{mean:.4}")).bold(),
                    style(format!("{min:.4}")).dim(),
                    match series.computed {
                        true => "",
                        false => " (incomplete)",
                    }
                ),
                _ => println!("  {metric} {}", style("-").dim()),
            }
        }
    }
}

/// Renders running job progress on a progress bar & non-interactive logs.
struct BarSink {
    bar: ProgressBar,
    logger: ProgressLogger,
    /// Distorted file names by asset index.
    names: Vec<String>,
    label: String,
    fps: f32,
    frame: u64,
}

impl BarSink {
    fn new(bar: ProgressBar, names: Vec<String>, log_interval: Option<LogInterval>) -> Self {
        Self {
            bar,
            logger: ProgressLogger::new(module_path!(), log_interval),
            names,
            label: String::new(),
            fps: 0.0,
            frame: 0,
        }
    }

    fn finish(&self, all_done: bool) {
        match all_done {
            true => self.bar.finish(),
            false => self.bar.abandon(),
        }
    }

    fn update_message(&self) {
        match self.fps > 0.0 {
            true => self
                .bar
                .set_message(format!("frame {}, {} fps, ", self.frame, self.fps)),
            false => self.bar.set_message(format!("frame {}, ", self.frame)),
        }
    }
}

impl SeriesSink for BarSink {
    fn reset_series(&mut self, metric: Metric, asset: usize) {
        let name = self.names.get(asset).map(String::as_str).unwrap_or("");
        self.label = format!("{metric} {name}");
        self.bar.set_prefix(self.label.clone());
        self.bar.set_position(0);
        self.bar.reset_eta();
        self.fps = 0.0;
        self.frame = 0;
        self.update_message();
        self.logger.begin(self.label.clone());
    }

    fn update_series(&mut self, _: Metric, _: usize, frames: &[u64], _: &[f64]) {
        if let Some(frame) = frames.last() {
            self.frame = *frame;
            self.update_message();
        }
    }

    fn remove_series(&mut self, asset: usize) {
        if asset < self.names.len() {
            self.names.remove(asset);
        }
    }

    fn set_progress(&mut self, percent: f32) {
        self.bar.set_position(percent.round() as u64);
        self.logger.update(percent, self.fps);
    }

    fn set_speed(&mut self, fps: f32) {
        self.fps = fps;
        self.update_message();
    }

    fn all_jobs_complete(&mut self) {
        self.bar.set_prefix("");
        self.bar.set_message("all done, ");
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
