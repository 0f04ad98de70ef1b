use super::Stage;

/// Observer for pipeline stage transitions.
///
/// Implement this to show progress to a user: a CLI prints a line per stage,
/// a form-based front end might update a status label.
///
/// # Example
///
/// ```rust
/// use reelpost::{PipelineHook, Stage};
///
/// struct Printer;
///
/// impl PipelineHook for Printer {
///     fn on_stage(&self, stage: Stage) {
///         eprintln!("-> {stage}");
///     }
/// }
/// ```
pub trait PipelineHook {
    /// Called once on entering each stage, in order.
    fn on_stage(&self, stage: Stage);
}

/// A hook that ignores every transition.
pub struct NoopHook;

impl PipelineHook for NoopHook {
    fn on_stage(&self, _stage: Stage) {}
}
