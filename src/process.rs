//! External process plumbing.
use anyhow::Context;
use log::{debug, warn};
use std::{
    borrow::Cow,
    ffi::OsString,
    fmt, io,
    path::PathBuf,
    process::{ExitStatus, Stdio},
};
use tokio::process::Command;
use tokio_process_stream::{Item, ProcessChunkStream};
use tokio_stream::StreamExt;

/// Output channel of a job process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Per-frame stats, `stats_file=-`.
    Stdout,
    /// ffmpeg logging & progress.
    Stderr,
}

/// Something that happened to a running job process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Output(Channel, Vec<u8>),
    Exited(ExitOutcome),
}

/// How a process exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    /// `false` if the process crashed, was killed by a signal or couldn't be waited on.
    pub normal: bool,
}

impl ExitOutcome {
    pub const SUCCESS: Self = Self {
        code: Some(0),
        normal: true,
    };

    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            normal: true,
        }
    }

    pub fn crashed() -> Self {
        Self {
            code: None,
            normal: false,
        }
    }

    pub fn success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl From<io::Result<ExitStatus>> for ExitOutcome {
    fn from(done: io::Result<ExitStatus>) -> Self {
        match done {
            Ok(status) => status.code().map_or_else(Self::crashed, Self::code),
            Err(_) => Self::crashed(),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.normal, self.code) {
            (true, Some(code)) => write!(f, "exit code {code}"),
            _ => "abnormal exit".fmt(f),
        }
    }
}

/// A running job process.
pub trait JobProcess {
    /// Next output chunk or the exit, `None` after exit.
    fn next_event(&mut self) -> impl Future<Output = Option<JobEvent>>;

    /// Kill the process & wait for it to exit.
    fn kill(&mut self) -> impl Future<Output = ()>;
}

/// Starts job processes.
pub trait Launcher {
    type Process: JobProcess;

    fn launch(&mut self, args: &[OsString]) -> anyhow::Result<Self::Process>;
}

/// Launches jobs as ffmpeg processes.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    bin: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

impl Launcher for FfmpegLauncher {
    type Process = FfmpegProcess;

    fn launch(&mut self, args: &[OsString]) -> anyhow::Result<FfmpegProcess> {
        let mut cmd = Command::new(&self.bin);
        cmd.kill_on_drop(true).args(args).stdin(Stdio::null());

        let cmd_str = cmd.to_cmd_str();
        debug!("cmd `{cmd_str}`");
        let stream =
            ProcessChunkStream::try_from(cmd).with_context(|| format!("spawn `{cmd_str}`"))?;
        Ok(FfmpegProcess { stream, cmd_str })
    }
}

#[derive(Debug)]
pub struct FfmpegProcess {
    stream: ProcessChunkStream,
    cmd_str: String,
}

impl JobProcess for FfmpegProcess {
    async fn next_event(&mut self) -> Option<JobEvent> {
        Some(match self.stream.next().await? {
            Item::Stdout(chunk) => JobEvent::Output(Channel::Stdout, chunk.to_vec()),
            Item::Stderr(chunk) => JobEvent::Output(Channel::Stderr, chunk.to_vec()),
            Item::Done(code) => {
                if let Err(err) = &code {
                    warn!("waiting on `{}`: {err}", self.cmd_str);
                }
                JobEvent::Exited(code.into())
            }
        })
    }

    async fn kill(&mut self) {
        if let Some(child) = self.stream.child_mut() {
            if let Err(err) = child.kill().await {
                debug!("kill `{}`: {err}", self.cmd_str);
            }
        }
    }
}

pub trait CommandExt {
    /// Program & args as a shell-escaped string, for logging.
    fn to_cmd_str(&self) -> String;
}

impl CommandExt for Command {
    fn to_cmd_str(&self) -> String {
        let cmd = self.as_std();
        std::iter::once(cmd.get_program())
            .chain(cmd.get_args())
            .map(|a| shell_escape::escape(Cow::Owned(a.to_string_lossy().into_owned())))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_outcomes() {
        assert!(ExitOutcome::SUCCESS.success());
        assert!(!ExitOutcome::code(1).success());
        assert!(!ExitOutcome::crashed().success());
        assert!(
            !ExitOutcome {
                code: Some(0),
                normal: false
            }
            .success()
        );
        assert!(!ExitOutcome::from(Err(io::Error::other("wait failed"))).success());

        assert_eq!(ExitOutcome::code(1).to_string(), "exit code 1");
        assert_eq!(ExitOutcome::crashed().to_string(), "abnormal exit");
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_outcomes() {
        use std::os::unix::process::ExitStatusExt;

        let outcome = |raw| ExitOutcome::from(Ok(ExitStatus::from_raw(raw)));
        assert_eq!(outcome(0), ExitOutcome::SUCCESS);
        assert_eq!(outcome(1 << 8), ExitOutcome::code(1));
        // SIGKILL
        assert_eq!(outcome(9), ExitOutcome::crashed());
    }

    #[test]
    fn cmd_str() {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-i", "my video.mp4", "-f", "null", "-"]);
        assert_eq!(cmd.to_cmd_str(), "ffmpeg -i 'my video.mp4' -f null -");
    }
}
