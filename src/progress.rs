use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The five checkpoints a segmentation call reports.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    GraphBuilt,
    WeightsComputed,
    MstBuilt,
    ThresholdApplied,
    RegionsMerged,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::GraphBuilt,
        Stage::WeightsComputed,
        Stage::MstBuilt,
        Stage::ThresholdApplied,
        Stage::RegionsMerged,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::GraphBuilt => "graph built",
            Stage::WeightsComputed => "weights computed",
            Stage::MstBuilt => "MST built",
            Stage::ThresholdApplied => "threshold applied",
            Stage::RegionsMerged => "regions merged",
        }
    }

    /// Completion fraction reported when this checkpoint is reached.
    pub fn fraction(self) -> f32 {
        match self {
            Stage::GraphBuilt => 0.1,
            Stage::WeightsComputed => 0.3,
            Stage::MstBuilt => 0.6,
            Stage::ThresholdApplied => 0.8,
            Stage::RegionsMerged => 1.0,
        }
    }
}

/// Receives `(stage name, fraction)` at each checkpoint.
///
/// Invoked synchronously on the thread running the segmentation.
pub trait ProgressListener {
    fn report(&self, stage_name: &str, fraction: f32);
}

impl<F> ProgressListener for F
where
    F: Fn(&str, f32),
{
    fn report(&self, stage_name: &str, fraction: f32) {
        self(stage_name, fraction)
    }
}

/// Shared flag a caller sets to abort a running segmentation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Optional hooks threaded through a segmentation call.
#[derive(Clone, Copy, Default)]
pub struct RunContext<'a> {
    pub progress: Option<&'a dyn ProgressListener>,
    pub cancel: Option<&'a CancellationToken>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        progress: Option<&'a dyn ProgressListener>,
        cancel: Option<&'a CancellationToken>,
    ) -> Self {
        Self { progress, cancel }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.map(|c| c.is_cancelled()).unwrap_or(false)
    }

    pub(crate) fn checkpoint(&self, stage: Stage) {
        log::debug!("Checkpoint: {} ({:.0}%)", stage.name(), stage.fraction() * 100.0);
        if let Some(listener) = self.progress {
            listener.report(stage.name(), stage.fraction());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn closures_act_as_listeners() {
        let seen = RefCell::new(Vec::new());
        let listener = |name: &str, fraction: f32| seen.borrow_mut().push((name.to_string(), fraction));
        let ctx = RunContext::new(Some(&listener), None);
        for stage in Stage::ALL {
            ctx.checkpoint(stage);
        }
        let seen = seen.into_inner();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], ("graph built".to_string(), 0.1));
        assert_eq!(seen[4], ("regions merged".to_string(), 1.0));
    }

    #[test]
    fn fractions_increase_monotonically() {
        let fractions: Vec<f32> = Stage::ALL.iter().map(|s| s.fraction()).collect();
        assert!(fractions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn cancellation_is_visible_through_clones() {
        let token = CancellationToken::new();
        let ctx_token = token.clone();
        let ctx = RunContext::new(None, Some(&ctx_token));
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
