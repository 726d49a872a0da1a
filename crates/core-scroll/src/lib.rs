//! Divides a frame into scroll regions and runs phase correlation over each
//! in parallel, producing remote copy commands and patching the previous
//! framebuffer so later tile diffing only sees the residual.

use core_fb::Framebuffer;
use core_phase::PhaseEngine;
use core_pool::WorkerPool;
use std::sync::OnceLock;

/// Longest side a scroll region is allowed to have.
pub const SCROLL_REGION_SIZE: u32 = 512;

/// Upper bound on the number of regions a single frame is divided into.
pub const MAX_REGIONS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollRegion {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl ScrollRegion {
    fn width(&self) -> u32 {
        self.x1 - self.x0
    }
    fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    /// Row-major grid of regions covering `width x height`, each side
    /// clipped to [`SCROLL_REGION_SIZE`] and to the frame edge. If that
    /// produces more than [`MAX_REGIONS`] cells the region side is doubled
    /// repeatedly until the count fits.
    pub fn grid(width: u32, height: u32) -> Vec<ScrollRegion> {
        let mut side = SCROLL_REGION_SIZE;
        loop {
            let cols = width.div_ceil(side).max(1);
            let rows = height.div_ceil(side).max(1);
            if (cols as usize) * (rows as usize) <= MAX_REGIONS || side >= width.max(height) {
                let mut out = Vec::with_capacity((cols * rows) as usize);
                for ry in 0..rows {
                    for rx in 0..cols {
                        let x0 = rx * side;
                        let y0 = ry * side;
                        let x1 = (x0 + side).min(width);
                        let y1 = (y0 + side).min(height);
                        if x0 < x1 && y0 < y1 {
                            out.push(ScrollRegion { x0, y0, x1, y1 });
                        }
                    }
                }
                return out;
            }
            side *= 2;
        }
    }
}

/// An accepted scroll: translate `region` by `(-dx, -dy)` remotely, and the
/// previous framebuffer has already been patched with the same shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedScroll {
    pub region: ScrollRegion,
    pub dx: i32,
    pub dy: i32,
}

/// Run the scroll detector over `current` against `previous`, patching
/// `previous` in place for every accepted region. Returns accepted scrolls
/// in row-major region order, matching the order they must be emitted on
/// the wire.
pub fn detect_scrolls(
    pool: &WorkerPool,
    engine: &PhaseEngine,
    current: &Framebuffer,
    previous: &mut Framebuffer,
    max_shift: i32,
) -> Vec<AcceptedScroll> {
    let regions = ScrollRegion::grid(current.width(), current.height());
    if regions.is_empty() {
        return Vec::new();
    }

    let slots: Vec<OnceLock<Option<(i32, i32)>>> =
        (0..regions.len()).map(|_| OnceLock::new()).collect();

    let previous_shared: &Framebuffer = previous;
    pool.parallel_for(regions.len(), |i| {
        let region = regions[i];
        let result = engine.with_thread_local(|workspace| {
            workspace.correlate(
                current,
                previous_shared,
                region.x0,
                region.y0,
                region.x1,
                region.y1,
                max_shift,
            )
        });

        let accept = result.valid
            && (result.dx.abs() + result.dy.abs()) >= 1
            && result.dx.abs() <= max_shift
            && result.dy.abs() <= max_shift
            && result.dx.unsigned_abs() <= region.width() / 2
            && result.dy.unsigned_abs() <= region.height() / 2;

        let _ = slots[i].set(if accept { Some((result.dx, result.dy)) } else { None });
    });

    let mut accepted = Vec::new();
    for (region, slot) in regions.iter().zip(slots.iter()) {
        if let Some((dx, dy)) = slot.get().copied().flatten() {
            previous.shift_region(region.x0, region.y0, region.x1, region.y1, dx, dy);
            accepted.push(AcceptedScroll {
                region: *region,
                dx,
                dy,
            });
        }
    }
    if !accepted.is_empty() {
        tracing::debug!(
            target: "scroll",
            regions = regions.len(),
            accepted = accepted.len(),
            "scroll_regions_accepted"
        );
    }
    accepted
}
