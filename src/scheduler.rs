//! Sequential scheduling of metric jobs over the distorted assets.
use crate::{
    asset::{DistortedAsset, Reference},
    job::{Job, JobRunner, RunnerEvent},
    metric::{Metric, MetricSample},
    process::{JobEvent, Launcher},
    sink::SeriesSink,
};
use anyhow::ensure;
use log::{debug, error, info, trace, warn};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    /// Running with nothing left to compute, further starts are ignored.
    AllDone,
    /// Stopped by the user, may be started again resuming from computed flags.
    Stopped,
}

/// Runs one job at a time, all ssim jobs in asset order then all psnr jobs.
///
/// A failed job is not retried & nothing further is dispatched until
/// [`Scheduler::stop`] & [`Scheduler::start`] are called again.
pub struct Scheduler<S, L: Launcher> {
    reference: Option<Reference>,
    assets: Vec<DistortedAsset>,
    runner: JobRunner<L>,
    sink: S,
    state: State,
}

impl<S: SeriesSink, L: Launcher> Scheduler<S, L> {
    pub fn new(runner: JobRunner<L>, sink: S) -> Self {
        Self {
            reference: None,
            assets: Vec::new(),
            runner,
            sink,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn assets(&self) -> &[DistortedAsset] {
        &self.assets
    }

    pub fn asset_mut(&mut self, index: usize) -> Option<&mut DistortedAsset> {
        self.assets.get_mut(index)
    }

    pub fn active_job(&self) -> Option<&Job> {
        self.runner.active_job()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Set the reference video, clearing all results if it changed.
    pub fn set_reference(&mut self, path: impl Into<PathBuf>) -> anyhow::Result<()> {
        ensure!(
            self.runner.active_job().is_none(),
            "cannot change the reference while a job is running"
        );
        let reference = Reference { path: path.into() };
        if self.reference.as_ref().is_some_and(|r| *r != reference) {
            debug!("reference changed to {}, resetting results", reference.path.display());
            for (index, asset) in self.assets.iter_mut().enumerate() {
                asset.reset();
                for metric in Metric::ALL {
                    self.sink.reset_series(metric, index);
                }
            }
        }
        self.reference = Some(reference);
        self.reopen();
        Ok(())
    }

    /// Add a distorted video, returning its index.
    pub fn add_asset(&mut self, path: impl Into<PathBuf>) -> anyhow::Result<usize> {
        let path = path.into();
        ensure!(
            !self.assets.iter().any(|a| a.path == path),
            "{} already added",
            path.display()
        );
        debug!("adding distorted {}", path.display());
        self.assets.push(DistortedAsset::new(path));
        self.reopen();
        Ok(self.assets.len() - 1)
    }

    /// Remove a distorted video & its series.
    ///
    /// If its job is running that job is stopped & the next one dispatched.
    pub async fn remove_asset(&mut self, index: usize) -> anyhow::Result<DistortedAsset> {
        ensure!(index < self.assets.len(), "no distorted video at index {index}");
        let path = &self.assets[index].path;
        let was_active = self.runner.active_job().is_some_and(|j| j.distorted == *path);
        if was_active {
            self.runner.stop().await;
        }

        let asset = self.assets.remove(index);
        self.sink.remove_series(index);
        debug!("removed distorted {}", asset.path.display());

        if was_active && self.state == State::Running {
            self.dispatch();
        }
        Ok(asset)
    }

    /// Start dispatching jobs. Ignored if already running.
    pub fn start(&mut self) -> anyhow::Result<()> {
        match self.state {
            State::Running | State::AllDone => {
                debug!("start ignored, state {:?}", self.state);
                return Ok(());
            }
            State::Idle | State::Stopped => {}
        }
        ensure!(self.reference.is_some(), "no reference video set");
        ensure!(!self.assets.is_empty(), "no distorted videos added");

        self.state = State::Running;
        self.dispatch();
        Ok(())
    }

    /// Kill any running job & stop dispatching. Ignored if not running.
    pub async fn stop(&mut self) {
        match self.state {
            State::Idle | State::Stopped => {
                debug!("stop ignored, state {:?}", self.state);
                return;
            }
            State::Running | State::AllDone => {}
        }
        if self.runner.stop().await.is_none() {
            info!("no job running to stop");
        }
        self.state = State::Stopped;
    }

    /// Wait for the next event of the running job, `None` if no job is running.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.runner.next_event().await
    }

    /// Apply a running job event, dispatching the next job after a success.
    pub fn handle_event(&mut self, event: JobEvent) {
        let index = self
            .runner
            .active_job()
            .and_then(|job| self.assets.iter().position(|a| a.path == job.distorted));
        let Some(index) = index else {
            trace!("ignoring event, no active job");
            return;
        };

        for out in self
            .runner
            .handle(event, &mut self.assets[index], index, &mut self.sink)
        {
            match out {
                RunnerEvent::Sample(MetricSample { frame, y, u, v, all }) => trace!(
                    "{} frame {frame}: y {y} u {u} v {v}, all {all}",
                    self.assets[index].path.display()
                ),
                RunnerEvent::Completed { success: true, .. } => {
                    if self.state == State::Running {
                        self.dispatch();
                    }
                }
                RunnerEvent::Completed {
                    job,
                    success: false,
                } => warn!(
                    "{} {} failed, no further jobs will be started",
                    job.metric,
                    job.distorted.display()
                ),
            }
        }
    }

    /// Handle job events until no job is running: all done, stalled or stopped.
    pub async fn run(&mut self) {
        while let Some(event) = self.next_event().await {
            self.handle_event(event);
        }
    }

    /// Next (asset index, metric) to compute, all ssim before any psnr.
    pub fn next_pair(&self) -> Option<(usize, Metric)> {
        Metric::ALL.into_iter().find_map(|metric| {
            self.assets
                .iter()
                .position(|a| !a.is_computed(metric))
                .map(|idx| (idx, metric))
        })
    }

    fn dispatch(&mut self) {
        let Some(reference) = &self.reference else {
            return;
        };
        let Some((index, metric)) = self.next_pair() else {
            info!("all jobs complete");
            self.state = State::AllDone;
            self.sink.all_jobs_complete();
            return;
        };

        let asset = &mut self.assets[index];
        let job = Job {
            metric,
            distorted: asset.path.clone(),
            reference: reference.path.clone(),
        };
        if let Err(err) = self.runner.start(job, asset, index, &mut self.sink) {
            error!("{err:#}");
        }
    }

    /// New work may be available after adding an asset or changing the reference.
    fn reopen(&mut self) {
        if self.state == State::AllDone && self.next_pair().is_some() {
            self.state = State::Idle;
        }
    }
}
