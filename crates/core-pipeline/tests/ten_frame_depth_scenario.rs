//! Ten consecutive frames where drain time dominates send time 4:1 and the
//! batch count always keeps up with depth: the controller should raise
//! depth by one every frame until it saturates at the configured ceiling.

use core_pipeline::DepthController;
use std::time::Duration;

#[test]
fn depth_rises_monotonically_then_saturates_at_max() {
    let max_depth = 6;
    let mut ctrl = DepthController::new(max_depth);
    let send = Duration::from_millis(5);
    let drain = Duration::from_millis(20);

    let mut seen = Vec::with_capacity(10);
    for _ in 0..10 {
        // A batch count of 1000 always satisfies `batches >= depth`.
        ctrl.update(send, drain, 1_000);
        seen.push(ctrl.depth());
    }

    for window in seen.windows(2) {
        assert!(window[1] >= window[0], "depth must never drop: {seen:?}");
    }
    assert_eq!(*seen.last().unwrap(), max_depth);
    assert!(seen.iter().any(|&d| d == max_depth));
}
