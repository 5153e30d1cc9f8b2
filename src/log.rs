use anyhow::ensure;
use indicatif::HumanDuration;
use log::{Level, info, log_enabled};
use std::{
    fmt,
    time::{Duration, Instant},
};

/// Interval between progress log messages when running non-interactively.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogInterval {
    /// Fixed duration between log messages.
    Duration(Duration),
    /// Fixed percentage of total progress between log messages.
    Percent(f32),
}

impl std::str::FromStr for LogInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        if let Some(pct) = s.strip_suffix('%') {
            let val: f32 = pct
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid percentage: {s}"))?;
            ensure!(
                val > 0.0 && val <= 100.0,
                "percentage must be between 0 and 100"
            );
            return Ok(Self::Percent(val));
        }
        if let Ok(d) = humantime::parse_duration(s) {
            ensure!(!d.is_zero(), "interval must be greater than 0");
            return Ok(Self::Duration(d));
        }
        anyhow::bail!(
            "invalid interval '{s}': expected duration (e.g., '30s', '1m') or percentage (e.g., '5%')"
        );
    }
}

impl fmt::Display for LogInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duration(d) => write!(f, "{}", humantime::format_duration(*d)),
            Self::Percent(p) => write!(f, "{p}%"),
        }
    }
}

/// Info logs progress messages of a running job.
#[derive(Debug)]
pub struct ProgressLogger {
    target: &'static str,
    interval: Option<LogInterval>,
    label: String,
    start: Instant,
    schedule: Schedule,
}

impl ProgressLogger {
    pub fn new(target: &'static str, interval: Option<LogInterval>) -> Self {
        Self {
            target,
            interval,
            label: String::new(),
            start: Instant::now(),
            schedule: Schedule::new(interval),
        }
    }

    /// Start timing a new job, e.g. "SSIM vid.mp4".
    pub fn begin(&mut self, label: impl Into<String>) {
        self.label = label.into();
        self.start = Instant::now();
        self.schedule = Schedule::new(self.interval);
    }

    /// Log progress of the current job if a log is due.
    /// * `percent` job completion `0..=100`
    /// * `fps` frames per second
    pub fn update(&mut self, percent: f32, fps: f32) {
        if !log_enabled!(target: self.target, Level::Info) || percent <= 0.0 {
            return;
        }
        let elapsed = self.start.elapsed();
        if !self.schedule.due(elapsed, percent) {
            return;
        }

        let done = f64::from(percent) / 100.0;
        let eta = Duration::from_secs_f64(elapsed.as_secs_f64() / done).saturating_sub(elapsed);
        info!(
            target: self.target,
            "{} {percent:.0}%, {fps} fps, eta {}",
            self.label,
            HumanDuration(eta)
        );
    }
}

/// When the next progress log is due.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Schedule {
    /// After 16s, 32s, 64s etc.
    Doubling { next: Duration },
    Every { step: Duration, next: Duration },
    Percent { step: f32, next: f32 },
}

impl Schedule {
    const FIRST_DOUBLING: Duration = Duration::from_secs(16);

    fn new(interval: Option<LogInterval>) -> Self {
        match interval {
            None => Self::Doubling {
                next: Self::FIRST_DOUBLING,
            },
            Some(LogInterval::Duration(step)) => Self::Every { step, next: step },
            Some(LogInterval::Percent(step)) => Self::Percent { step, next: step },
        }
    }

    /// Whether a log is due at `elapsed` & `percent`, if so moving on to the following log.
    fn due(&mut self, elapsed: Duration, percent: f32) -> bool {
        match self {
            Self::Doubling { next } if elapsed >= *next => {
                while *next <= elapsed {
                    *next *= 2;
                }
                true
            }
            Self::Every { step, next } if elapsed >= *next => {
                let steps = (elapsed.as_secs_f64() / step.as_secs_f64()) as u32 + 1;
                *next = *step * steps;
                true
            }
            Self::Percent { step, next } if percent >= *next => {
                *next = ((percent / *step).floor() + 1.0) * *step;
                true
            }
            _ => false,
        }
    }
}
