use crate::metric::Metric;

/// Receiver of live series & progress updates, e.g. a plot.
///
/// `asset` is the index of the distorted asset in insertion order.
pub trait SeriesSink {
    /// A job for `metric` on `asset` is starting, clear its plot.
    fn reset_series(&mut self, metric: Metric, asset: usize);

    /// The full series so far for the running job.
    fn update_series(&mut self, metric: Metric, asset: usize, frames: &[u64], values: &[f64]);

    /// `asset` has been removed, later indices shift down by one.
    fn remove_series(&mut self, _asset: usize) {}

    /// Running job progress in the range `0..=100`.
    fn set_progress(&mut self, _percent: f32) {}

    /// Running job analysis speed.
    fn set_speed(&mut self, _fps: f32) {}

    fn all_jobs_complete(&mut self) {}
}
