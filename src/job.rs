//! Single ffmpeg metric job execution.
use crate::{
    asset::DistortedAsset,
    lines::LineBuffer,
    metric::{self, Metric, MetricSample},
    process::{Channel, ExitOutcome, JobEvent, JobProcess, Launcher},
    sink::SeriesSink,
};
use anyhow::{Context, ensure};
use log::{error, info, trace};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

/// Default seconds of each input to analyse.
pub const DEFAULT_TIME_LIMIT_S: u32 = 60;

/// Computation of one metric for one distorted video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub metric: Metric,
    pub distorted: PathBuf,
    pub reference: PathBuf,
}

impl Job {
    /// ffmpeg args, reading at most `time_limit_s` seconds of each input
    /// & writing per-frame stats to stdout.
    pub fn ffmpeg_args(&self, time_limit_s: u32) -> Vec<OsString> {
        let t = OsString::from(time_limit_s.to_string());
        vec![
            "-i".into(),
            self.distorted.clone().into(),
            "-t".into(),
            t.clone(),
            "-i".into(),
            self.reference.clone().into(),
            "-t".into(),
            t,
            "-lavfi".into(),
            self.metric.lavfi().into(),
            "-f".into(),
            "null".into(),
            "-".into(),
        ]
    }
}

/// Output of [`JobRunner::handle`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    Sample(MetricSample),
    /// The job process exited, `success` if it exited normally with code 0.
    Completed { job: Job, success: bool },
}

#[derive(Debug)]
struct ActiveJob<P> {
    job: Job,
    process: P,
}

/// Owns the job process, at most one at a time.
pub struct JobRunner<L: Launcher> {
    launcher: L,
    time_limit_s: u32,
    active: Option<ActiveJob<L::Process>>,
    /// Reset at each job start, output never carries over between jobs.
    stdout: LineBuffer,
    stderr: LineBuffer,
}

impl<L: Launcher> JobRunner<L> {
    pub fn new(launcher: L, time_limit_s: u32) -> Self {
        Self {
            launcher,
            time_limit_s,
            active: None,
            stdout: LineBuffer::new(),
            stderr: LineBuffer::progress(),
        }
    }

    pub fn active_job(&self) -> Option<&Job> {
        self.active.as_ref().map(|a| &a.job)
    }

    /// Launch `job`, clearing previous values for the job's metric on `asset`.
    ///
    /// A launch failure leaves no active job & the asset metric not computed.
    pub fn start(
        &mut self,
        job: Job,
        asset: &mut DistortedAsset,
        index: usize,
        sink: &mut impl SeriesSink,
    ) -> anyhow::Result<()> {
        ensure!(self.active.is_none(), "a job is already running");

        self.stdout.reset();
        self.stderr.reset();
        asset.series_mut(job.metric).reset();
        sink.reset_series(job.metric, index);

        info!(
            "{} {} vs reference {}",
            job.metric,
            file_name(&job.distorted),
            file_name(&job.reference),
        );
        let process = self
            .launcher
            .launch(&job.ffmpeg_args(self.time_limit_s))
            .with_context(|| format!("{} {}", job.metric, job.distorted.display()))?;

        self.active = Some(ActiveJob { job, process });
        Ok(())
    }

    /// Wait for the next event of the active job, `None` if there is no active job.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        let active = self.active.as_mut()?;
        match active.process.next_event().await {
            Some(event) => Some(event),
            // output ended without an exit status
            None => Some(JobEvent::Exited(ExitOutcome::crashed())),
        }
    }

    /// Apply an event of the active job to its `asset` & `sink`.
    pub fn handle(
        &mut self,
        event: JobEvent,
        asset: &mut DistortedAsset,
        index: usize,
        sink: &mut impl SeriesSink,
    ) -> Vec<RunnerEvent> {
        let (channel, chunk) = match event {
            JobEvent::Exited(outcome) => return self.exited(outcome, asset, index, sink),
            JobEvent::Output(channel, chunk) => (channel, chunk),
        };
        let Some(active) = self.active.as_mut() else {
            trace!("ignoring {} bytes of output, no active job", chunk.len());
            return vec![];
        };

        match channel {
            Channel::Stderr => {
                let fps = self
                    .stderr
                    .feed(&chunk)
                    .iter()
                    .rev()
                    .find_map(|line| metric::parse_fps(line));
                if let Some(fps) = fps {
                    sink.set_speed(fps);
                }
                vec![]
            }
            Channel::Stdout => {
                let metric = active.job.metric;
                self.stdout
                    .feed(&chunk)
                    .iter()
                    .filter_map(|line| record(metric, line, asset, index, sink))
                    .map(RunnerEvent::Sample)
                    .collect()
            }
        }
    }

    /// Kill the active job process & wait for it to exit.
    ///
    /// Returns the interrupted job, `None` if there was no active job.
    pub async fn stop(&mut self) -> Option<Job> {
        let mut active = self.active.take()?;
        active.process.kill().await;
        info!(
            "{} {} stopped",
            active.job.metric,
            file_name(&active.job.distorted)
        );
        Some(active.job)
    }

    fn exited(
        &mut self,
        outcome: ExitOutcome,
        asset: &mut DistortedAsset,
        index: usize,
        sink: &mut impl SeriesSink,
    ) -> Vec<RunnerEvent> {
        let Some(ActiveJob { job, .. }) = self.active.take() else {
            return vec![];
        };

        let mut events: Vec<_> = self
            .stdout
            .finish()
            .and_then(|line| record(job.metric, &line, asset, index, sink))
            .map(RunnerEvent::Sample)
            .into_iter()
            .collect();

        let success = outcome.success();
        let series = asset.series_mut(job.metric);
        series.computed = success;
        match success {
            true => info!(
                "{} {} done, {} frames",
                job.metric,
                file_name(&job.distorted),
                series.values.len(),
            ),
            false => error!(
                "{} {} failed, {outcome}",
                job.metric,
                file_name(&job.distorted)
            ),
        }

        events.push(RunnerEvent::Completed { job, success });
        events
    }
}

/// Parse a stats line & if it's a sample add it to the asset series.
fn record(
    metric: Metric,
    line: &str,
    asset: &mut DistortedAsset,
    index: usize,
    sink: &mut impl SeriesSink,
) -> Option<MetricSample> {
    if line.trim().is_empty() {
        return None;
    }
    let sample = metric.parse_line(line)?;

    let series = asset.series_mut(metric);
    series.push(&sample);
    sink.update_series(metric, index, &series.frames, &series.values);

    if let Some(total) = asset.expected_frames.filter(|t| *t > 0) {
        sink.set_progress((sample.frame as f32 * 100.0 / total as f32).min(100.0));
    }
    Some(sample)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{Recorder, ScriptedLauncher, SinkCall};

    const SSIM_LINE: &[u8] = b"n:1 Y:0.99 U:0.98 V:0.97 All:0.986\n";

    fn ssim_job() -> Job {
        Job {
            metric: Metric::Ssim,
            distorted: "V1".into(),
            reference: "R".into(),
        }
    }

    fn started(launcher: &ScriptedLauncher) -> (JobRunner<ScriptedLauncher>, DistortedAsset, Recorder) {
        let mut runner = JobRunner::new(launcher.clone(), DEFAULT_TIME_LIMIT_S);
        let mut asset = DistortedAsset::new("V1");
        let mut sink = Recorder::default();
        runner.start(ssim_job(), &mut asset, 0, &mut sink).unwrap();
        (runner, asset, sink)
    }

    #[test]
    fn ffmpeg_args() {
        let args = ssim_job().ffmpeg_args(60);
        assert_eq!(
            args,
            [
                "-i",
                "V1",
                "-t",
                "60",
                "-i",
                "R",
                "-t",
                "60",
                "-lavfi",
                "ssim=stats_file=-",
                "-f",
                "null",
                "-"
            ]
        );

        let psnr = Job {
            metric: Metric::Psnr,
            ..ssim_job()
        };
        assert_eq!(psnr.ffmpeg_args(5)[3], "5");
        assert_eq!(psnr.ffmpeg_args(5)[9], "psnr=stats_file=-");
    }

    #[test]
    fn start_resets_series() {
        let launcher = ScriptedLauncher::default();
        let mut runner = JobRunner::new(launcher.clone(), DEFAULT_TIME_LIMIT_S);
        let mut asset = DistortedAsset::new("V1");
        asset.ssim.computed = true;
        asset.ssim.frames.push(7);
        asset.ssim.values.push(0.5);
        asset.psnr.values.push(33.0);
        let mut sink = Recorder::default();

        runner.start(ssim_job(), &mut asset, 3, &mut sink).unwrap();

        assert!(!asset.ssim.computed);
        assert!(asset.ssim.values.is_empty());
        assert_eq!(asset.psnr.values, [33.0], "other metric untouched");
        assert_eq!(sink.calls, [SinkCall::Reset(Metric::Ssim, 3)]);
        assert_eq!(launcher.launches(), [ssim_job().ffmpeg_args(60)]);
        assert_eq!(runner.active_job(), Some(&ssim_job()));

        // only one job at a time
        let err = runner.start(ssim_job(), &mut asset, 3, &mut sink);
        assert!(err.is_err());
        assert_eq!(launcher.launches().len(), 1);
    }

    #[test]
    fn sample_then_success() {
        let launcher = ScriptedLauncher::default();
        let (mut runner, mut asset, mut sink) = started(&launcher);

        let events = runner.handle(
            JobEvent::Output(Channel::Stdout, SSIM_LINE.to_vec()),
            &mut asset,
            0,
            &mut sink,
        );
        assert!(matches!(events[..], [RunnerEvent::Sample(MetricSample { frame: 1, .. })]));
        assert_eq!(
            sink.calls.last(),
            Some(&SinkCall::Update(Metric::Ssim, 0, vec![1], vec![0.986]))
        );

        let events = runner.handle(
            JobEvent::Exited(ExitOutcome::SUCCESS),
            &mut asset,
            0,
            &mut sink,
        );
        assert_eq!(
            events,
            [RunnerEvent::Completed {
                job: ssim_job(),
                success: true
            }]
        );
        assert!(asset.ssim.computed);
        assert!(runner.active_job().is_none());
    }

    #[test]
    fn failure_exit() {
        let launcher = ScriptedLauncher::default();
        let (mut runner, mut asset, mut sink) = started(&launcher);

        let events = runner.handle(JobEvent::Exited(ExitOutcome::code(1)), &mut asset, 0, &mut sink);
        assert_eq!(
            events,
            [RunnerEvent::Completed {
                job: ssim_job(),
                success: false
            }]
        );
        assert!(!asset.ssim.computed);
        assert!(runner.active_job().is_none());
    }

    #[test]
    fn abnormal_exit_code_0_fails() {
        let launcher = ScriptedLauncher::default();
        let (mut runner, mut asset, mut sink) = started(&launcher);

        let outcome = ExitOutcome {
            code: Some(0),
            normal: false,
        };
        let events = runner.handle(JobEvent::Exited(outcome), &mut asset, 0, &mut sink);
        assert!(matches!(events[..], [RunnerEvent::Completed { success: false, .. }]));
    }

    #[test]
    fn lines_split_across_chunks() {
        let launcher = ScriptedLauncher::default();
        let (mut runner, mut asset, mut sink) = started(&launcher);

        let chunks: [&[u8]; 3] = [
            b"n:1 Y:0.99 U:0.98 V:0.97 All:0.986\nn:2 Y:0.9",
            b"8 U:0.97 V:0.96 All:0.975\n\nn:3 Y:0.97 U:0.96 V:0.95 ",
            b"All:0.965",
        ];
        let mut samples = 0;
        for chunk in chunks {
            samples += runner
                .handle(
                    JobEvent::Output(Channel::Stdout, chunk.to_vec()),
                    &mut asset,
                    0,
                    &mut sink,
                )
                .len();
        }
        assert_eq!(samples, 2);

        // unterminated last line is flushed on exit
        let events = runner.handle(
            JobEvent::Exited(ExitOutcome::SUCCESS),
            &mut asset,
            0,
            &mut sink,
        );
        assert_eq!(events.len(), 2);
        assert_eq!(asset.ssim.frames, [1, 2, 3]);
        assert_eq!(asset.ssim.values, [0.986, 0.975, 0.965]);
    }

    #[test]
    fn stderr_speed() {
        let launcher = ScriptedLauncher::default();
        let (mut runner, mut asset, mut sink) = started(&launcher);
        sink.calls.clear();

        let stderr = b"frame=   28 fps= 28 q=-0.0 size=N/A\rframe=   46 fps= 31 q=-0.0 size=N/A\r";
        let events = runner.handle(
            JobEvent::Output(Channel::Stderr, stderr.to_vec()),
            &mut asset,
            0,
            &mut sink,
        );
        assert!(events.is_empty());
        assert_eq!(sink.calls, [SinkCall::Speed(31.0)]);

        // stats lines on stderr are not samples
        runner.handle(
            JobEvent::Output(Channel::Stderr, SSIM_LINE.to_vec()),
            &mut asset,
            0,
            &mut sink,
        );
        assert!(asset.ssim.values.is_empty());
    }

    #[test]
    fn progress_percent() {
        let launcher = ScriptedLauncher::default();
        let (mut runner, mut asset, mut sink) = started(&launcher);
        asset.expected_frames = Some(4);

        runner.handle(
            JobEvent::Output(Channel::Stdout, SSIM_LINE.to_vec()),
            &mut asset,
            0,
            &mut sink,
        );
        assert_eq!(sink.calls.last(), Some(&SinkCall::Progress(25.0)));

        runner.handle(
            JobEvent::Output(
                Channel::Stdout,
                b"n:9 Y:0.99 U:0.98 V:0.97 All:0.986\n".to_vec(),
            ),
            &mut asset,
            0,
            &mut sink,
        );
        assert_eq!(sink.calls.last(), Some(&SinkCall::Progress(100.0)));
    }

    #[test]
    fn psnr_job_clamps_infinite() {
        let launcher = ScriptedLauncher::default();
        let mut runner = JobRunner::new(launcher, DEFAULT_TIME_LIMIT_S);
        let mut asset = DistortedAsset::new("V1");
        let mut sink = Recorder::default();
        let job = Job {
            metric: Metric::Psnr,
            ..ssim_job()
        };
        runner.start(job, &mut asset, 0, &mut sink).unwrap();

        runner.handle(
            JobEvent::Output(
                Channel::Stdout,
                b"n:5 mse_avg:0.0 mse_y:0.0 mse_u:0.0 mse_v:0.0 psnr_avg:inf psnr_y:inf psnr_u:inf psnr_v:inf\n"
                    .to_vec(),
            ),
            &mut asset,
            0,
            &mut sink,
        );
        assert_eq!(asset.psnr.frames, [5]);
        assert_eq!(asset.psnr.values, [100.0]);
        assert!(asset.ssim.values.is_empty());
    }

    #[tokio::test]
    async fn stop_kills() {
        let launcher = ScriptedLauncher::default();
        let (mut runner, _, _) = started(&launcher);

        assert_eq!(runner.stop().await, Some(ssim_job()));
        assert_eq!(launcher.kills(), 1);
        assert!(runner.active_job().is_none());
        assert_eq!(runner.next_event().await, None);
        assert_eq!(runner.stop().await, None);
        assert_eq!(launcher.kills(), 1);
    }

    #[test]
    fn launch_failure() {
        let launcher = ScriptedLauncher::default();
        launcher.push_launch_error();
        let mut runner = JobRunner::new(launcher, DEFAULT_TIME_LIMIT_S);
        let mut asset = DistortedAsset::new("V1");
        let mut sink = Recorder::default();

        assert!(runner.start(ssim_job(), &mut asset, 0, &mut sink).is_err());
        assert!(runner.active_job().is_none());
        assert!(!asset.ssim.computed);
    }

    #[tokio::test]
    async fn events_from_process() {
        let launcher = ScriptedLauncher::default();
        launcher.push_script(vec![
            JobEvent::Output(Channel::Stdout, SSIM_LINE.to_vec()),
            JobEvent::Exited(ExitOutcome::SUCCESS),
        ]);
        let (mut runner, mut asset, mut sink) = started(&launcher);

        let mut completed = None;
        while let Some(event) = runner.next_event().await {
            for out in runner.handle(event, &mut asset, 0, &mut sink) {
                if let RunnerEvent::Completed { success, .. } = out {
                    completed = Some(success);
                }
            }
        }
        assert_eq!(completed, Some(true));
        assert_eq!(asset.ssim.values, [0.986]);
    }

    #[tokio::test]
    async fn output_ending_without_exit_is_failure() {
        let launcher = ScriptedLauncher::default();
        launcher.push_script(vec![]);
        let (mut runner, _, _) = started(&launcher);

        assert_eq!(
            runner.next_event().await,
            Some(JobEvent::Exited(ExitOutcome::crashed()))
        );
    }
}
