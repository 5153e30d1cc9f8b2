//! Test doubles for job processes & series sinks.
use crate::{
    metric::Metric,
    process::{ExitOutcome, JobEvent, JobProcess, Launcher},
    sink::SeriesSink,
};
use anyhow::bail;
use std::{cell::RefCell, collections::VecDeque, ffi::OsString, rc::Rc};

#[derive(Debug)]
enum Script {
    Events(Vec<JobEvent>),
    LaunchError,
}

#[derive(Debug, Default)]
struct LauncherState {
    scripts: VecDeque<Script>,
    launches: Vec<Vec<OsString>>,
    kills: usize,
}

/// Launcher replaying pushed scripts in launch order.
///
/// Without a pushed script a launched process exits successfully straight away.
/// Clones share state so launches can be inspected after moving a clone into a runner.
#[derive(Debug, Default, Clone)]
pub struct ScriptedLauncher(Rc<RefCell<LauncherState>>);

impl ScriptedLauncher {
    pub fn push_script(&self, events: Vec<JobEvent>) {
        self.0.borrow_mut().scripts.push_back(Script::Events(events));
    }

    pub fn push_launch_error(&self) {
        self.0.borrow_mut().scripts.push_back(Script::LaunchError);
    }

    /// Args of every launch so far.
    pub fn launches(&self) -> Vec<Vec<OsString>> {
        self.0.borrow().launches.clone()
    }

    pub fn kills(&self) -> usize {
        self.0.borrow().kills
    }
}

impl Launcher for ScriptedLauncher {
    type Process = ScriptedProcess;

    fn launch(&mut self, args: &[OsString]) -> anyhow::Result<ScriptedProcess> {
        let mut state = self.0.borrow_mut();
        let events = match state.scripts.pop_front() {
            Some(Script::LaunchError) => bail!("No such file or directory (os error 2)"),
            Some(Script::Events(events)) => events,
            None => vec![JobEvent::Exited(ExitOutcome::SUCCESS)],
        };
        state.launches.push(args.to_vec());
        Ok(ScriptedProcess {
            events: events.into(),
            launcher: self.0.clone(),
        })
    }
}

#[derive(Debug)]
pub struct ScriptedProcess {
    events: VecDeque<JobEvent>,
    launcher: Rc<RefCell<LauncherState>>,
}

impl JobProcess for ScriptedProcess {
    async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.pop_front()
    }

    async fn kill(&mut self) {
        self.events.clear();
        self.launcher.borrow_mut().kills += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Reset(Metric, usize),
    Update(Metric, usize, Vec<u64>, Vec<f64>),
    Remove(usize),
    Progress(f32),
    Speed(f32),
    AllDone,
}

/// Sink recording every call.
#[derive(Debug, Default)]
pub struct Recorder {
    pub calls: Vec<SinkCall>,
}

impl Recorder {
    /// Metric & asset index of each reset, i.e. each job started.
    pub fn resets(&self) -> Vec<(Metric, usize)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                SinkCall::Reset(m, i) => Some((*m, *i)),
                _ => None,
            })
            .collect()
    }
}

impl SeriesSink for Recorder {
    fn reset_series(&mut self, metric: Metric, asset: usize) {
        self.calls.push(SinkCall::Reset(metric, asset));
    }

    fn update_series(&mut self, metric: Metric, asset: usize, frames: &[u64], values: &[f64]) {
        self.calls
            .push(SinkCall::Update(metric, asset, frames.to_vec(), values.to_vec()));
    }

    fn remove_series(&mut self, asset: usize) {
        self.calls.push(SinkCall::Remove(asset));
    }

    fn set_progress(&mut self, percent: f32) {
        self.calls.push(SinkCall::Progress(percent));
    }

    fn set_speed(&mut self, fps: f32) {
        self.calls.push(SinkCall::Speed(fps));
    }

    fn all_jobs_complete(&mut self) {
        self.calls.push(SinkCall::AllDone);
    }
}
