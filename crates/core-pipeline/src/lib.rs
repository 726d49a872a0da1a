//! Pipeline depth controller: how many writes the sender may have in flight
//! before it must wait for a response, adjusted additively from one frame's
//! measured timings.

use std::time::Duration;

/// Upper bound on pipeline depth.
pub const DEFAULT_MAX_DEPTH: u32 = 8;

/// Tracks the sender's current pipeline depth. Touched only by the sender
/// thread; no internal locking.
#[derive(Debug, Clone, Copy)]
pub struct DepthController {
    depth: u32,
    max_depth: u32,
}

impl DepthController {
    pub fn new(max_depth: u32) -> Self {
        Self {
            depth: 1,
            max_depth: max_depth.max(1),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Feed one frame's measured send time, drain time and batch count,
    /// adjusting depth by at most one step.
    pub fn update(&mut self, send_time: Duration, drain_time: Duration, batches: u32) {
        let send = send_time.as_secs_f64();
        let drain = drain_time.as_secs_f64();

        if drain > send * 1.5 && batches >= self.depth {
            self.depth = (self.depth + 1).min(self.max_depth);
            tracing::trace!(target: "pipeline", depth = self.depth, "depth_increased");
        } else if send > drain * 2.0 && self.depth > 1 {
            self.depth -= 1;
            tracing::trace!(target: "pipeline", depth = self.depth, "depth_decreased");
        }
    }
}

impl Default for DepthController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increases_when_drain_dominates_and_batches_keep_up() {
        let mut ctrl = DepthController::new(4);
        ctrl.update(Duration::from_millis(10), Duration::from_millis(20), 1);
        assert_eq!(ctrl.depth(), 2);
    }

    #[test]
    fn does_not_increase_past_max_depth() {
        let mut ctrl = DepthController::new(2);
        ctrl.update(Duration::from_millis(10), Duration::from_millis(100), 5);
        assert_eq!(ctrl.depth(), 2);
        ctrl.update(Duration::from_millis(10), Duration::from_millis(100), 5);
        assert_eq!(ctrl.depth(), 2);
    }

    #[test]
    fn decreases_when_send_dominates_and_depth_above_one() {
        let mut ctrl = DepthController::new(4);
        ctrl.update(Duration::from_millis(10), Duration::from_millis(20), 1);
        assert_eq!(ctrl.depth(), 2);
        ctrl.update(Duration::from_millis(100), Duration::from_millis(10), 1);
        assert_eq!(ctrl.depth(), 1);
    }

    #[test]
    fn never_decreases_below_one() {
        let mut ctrl = DepthController::new(4);
        ctrl.update(Duration::from_millis(100), Duration::from_millis(1), 1);
        assert_eq!(ctrl.depth(), 1);
    }

    #[test]
    fn holds_when_neither_condition_met() {
        let mut ctrl = DepthController::new(4);
        ctrl.update(Duration::from_millis(10), Duration::from_millis(12), 1);
        assert_eq!(ctrl.depth(), 1);
    }

    #[test]
    fn increase_requires_batches_to_keep_up_with_depth() {
        let mut ctrl = DepthController::new(4);
        ctrl.update(Duration::from_millis(10), Duration::from_millis(20), 1);
        assert_eq!(ctrl.depth(), 2);
        // batches (1) below current depth (2): should not increase again
        ctrl.update(Duration::from_millis(10), Duration::from_millis(20), 1);
        assert_eq!(ctrl.depth(), 2);
    }
}
