//! The frame sender: the single long-lived thread that drains the frame
//! queue, diffs and encodes tiles, and pipelines writes to the remote draw
//! connection.

use core_codec::encode_tile;
use core_fb::{FrameQueue, Framebuffer, Tile};
use core_phase::PhaseEngine;
use core_pipeline::DepthController;
use core_pool::WorkerPool;
use core_scroll::detect_scrolls;
use core_wire::{DrawCommand, Plan9Conn, WireBatcher, WireError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("window lookup failed: {0}")]
    WindowLookup(String),
}

/// Position, size and remote image id of the window the sender is driving.
/// Re-fetched whenever the window-changed flag is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub dst_id: u32,
    pub screen_id: u32,
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl WindowGeometry {
    pub fn width(&self) -> u32 {
        (self.x1 - self.x0).max(0) as u32
    }
    pub fn height(&self) -> u32 {
        (self.y1 - self.y0).max(0) as u32
    }
}

/// Stands in for the remote `/dev/wctl`-style window lookup. A resize being
/// in flight means the sender should skip this iteration rather than draw
/// against stale geometry.
pub trait RemoteWindow {
    fn lookup(&mut self) -> Result<WindowGeometry, SendError>;
    fn resize_pending(&self) -> bool;
}

/// Snapshot counters for observability, updated only by the sender thread.
#[derive(Debug, Default)]
pub struct SenderStats {
    pub frames_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub tiles_sent: AtomicU64,
    pub full_frames: AtomicU64,
}

impl SenderStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.frames_sent.load(Ordering::Relaxed),
            self.bytes_sent.load(Ordering::Relaxed),
            self.tiles_sent.load(Ordering::Relaxed),
            self.full_frames.load(Ordering::Relaxed),
        )
    }
}

/// Thickness, in pixels, of the four border rectangles appended after the
/// copy-to-screen command.
const BORDER_THICKNESS: i32 = 4;

/// Mask image id used for the solid-fill border and copy-to-screen draws.
/// The real mount resolves this to the "all-ones" mask Plan 9's draw device
/// reserves for solid fills; a fake `Plan9Conn` only needs to see the same
/// constant on both ends to assert ordering.
const SOLID_FILL_MASK: u32 = 0;

pub struct SenderConfig {
    pub max_shift: i32,
    pub scratch_bound: usize,
    pub max_depth: u32,
    pub unknown_id_retry_threshold: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_shift: 64,
            scratch_bound: 4096,
            max_depth: core_pipeline::DEFAULT_MAX_DEPTH,
            unknown_id_retry_threshold: 3,
        }
    }
}

/// Owns everything the per-frame algorithm touches between frames: the
/// previous-framebuffer copy, pipeline depth, and current window geometry.
pub struct FrameSender<C: Plan9Conn, W: RemoteWindow> {
    conn: C,
    window: W,
    config: SenderConfig,
    pool: WorkerPool,
    phase: PhaseEngine,
    previous: Framebuffer,
    previous_valid: bool,
    geometry: Option<WindowGeometry>,
    depth: DepthController,
    unknown_id_streak: u32,
    pub stats: SenderStats,
}

impl<C: Plan9Conn, W: RemoteWindow> FrameSender<C, W> {
    pub fn new(conn: C, window: W, config: SenderConfig) -> Self {
        let max_depth = config.max_depth;
        Self {
            conn,
            window,
            config,
            pool: WorkerPool::new(),
            phase: PhaseEngine::new(),
            previous: Framebuffer::new(0, 0),
            previous_valid: false,
            geometry: None,
            depth: DepthController::new(max_depth),
            unknown_id_streak: 0,
            stats: SenderStats::default(),
        }
    }

    /// The underlying connection, exposed read-only so callers (and tests)
    /// can inspect what has actually gone out on the wire.
    pub fn conn(&self) -> &C {
        &self.conn
    }

    fn invalidate(&mut self) {
        self.previous.invalidate();
        self.previous_valid = false;
    }

    fn ensure_geometry(&mut self) -> Result<WindowGeometry, SendError> {
        match self.geometry {
            Some(g) => Ok(g),
            None => {
                let g = self.window.lookup()?;
                if self.previous.width() != g.width() || self.previous.height() != g.height() {
                    self.previous.resize(g.width(), g.height());
                    self.invalidate();
                }
                self.geometry = Some(g);
                Ok(g)
            }
        }
    }

    /// Run one whole-frame iteration against `active` (already taken from
    /// the queue), `window_changed` being the flag observed since the last
    /// iteration, and `force_full_frame` the externally-requested override
    /// (e.g. a periodic full-refresh interval). Returns `true` if a frame
    /// was actually sent, `false` if the iteration was skipped (pending
    /// resize).
    pub fn send_frame(
        &mut self,
        active: &Framebuffer,
        window_changed: bool,
        force_full_frame: bool,
    ) -> Result<bool, SendError> {
        let frame_start = Instant::now();
        let mut do_full = force_full_frame;

        if window_changed {
            self.geometry = None;
        }
        let geometry = self.ensure_geometry()?;
        if self.window.resize_pending() {
            return Ok(false);
        }
        if geometry.width() != self.previous.width() || geometry.height() != self.previous.height()
        {
            self.previous.resize(geometry.width(), geometry.height());
            self.invalidate();
        }
        if !self.previous_valid {
            do_full = true;
        }

        let mut scrolls = Vec::new();
        if !do_full {
            scrolls = detect_scrolls(
                &self.pool,
                &self.phase,
                active,
                &mut self.previous,
                self.config.max_shift,
            );
        }

        let mut batcher = WireBatcher::new(self.conn.iounit(), self.conn.msize());
        let mut pending_writes: u32 = 0;
        let mut batches: u32 = 0;
        let mut bytes_sent: u64 = 0;
        let mut tiles_sent: u64 = 0;
        let mut transmitted_tiles: Vec<Tile> = Vec::new();

        let mut flush_batch = |batcher: &mut WireBatcher,
                                conn: &mut C,
                                pending_writes: &mut u32,
                                batches: &mut u32,
                                bytes_sent: &mut u64,
                                depth: u32|
         -> Result<(), SendError> {
            let bytes = batcher.take();
            if bytes.is_empty() {
                return Ok(());
            }
            *bytes_sent += bytes.len() as u64;
            conn.write_batch(&bytes)?;
            *pending_writes += 1;
            *batches += 1;
            if *pending_writes > depth {
                conn.recv_response()?;
                *pending_writes -= 1;
            }
            Ok(())
        };

        for scroll in &scrolls {
            let cmd = DrawCommand {
                screen_id: geometry.screen_id,
                dst_id: geometry.dst_id,
                mask_id: SOLID_FILL_MASK,
                dst_rect: [
                    scroll.region.x0 as i32,
                    scroll.region.y0 as i32,
                    scroll.region.x1 as i32,
                    scroll.region.y1 as i32,
                ],
                mask_point: [0, 0],
                src_point: [-scroll.dx, -scroll.dy],
            };
            if !batcher.push_draw(&cmd) {
                flush_batch(
                    &mut batcher,
                    &mut self.conn,
                    &mut pending_writes,
                    &mut batches,
                    &mut bytes_sent,
                    self.depth.depth(),
                )?;
                batcher.push_draw(&cmd);
            }
        }

        for tile in Tile::grid(active.width(), active.height()) {
            if !do_full && !tile.is_dirty(active, &self.previous) {
                continue;
            }
            let encoding = encode_tile(
                active,
                &self.previous,
                self.previous_valid,
                &tile,
                self.config.scratch_bound,
            );
            loop {
                let pushed = batcher.push_tile(
                    geometry.dst_id,
                    tile.x0 as i32,
                    tile.y0 as i32,
                    tile.x1 as i32,
                    tile.y1 as i32,
                    &encoding,
                );
                if pushed {
                    break;
                }
                flush_batch(
                    &mut batcher,
                    &mut self.conn,
                    &mut pending_writes,
                    &mut batches,
                    &mut bytes_sent,
                    self.depth.depth(),
                )?;
            }
            tiles_sent += 1;
            transmitted_tiles.push(tile);
        }

        let copy_cmd = DrawCommand {
            screen_id: geometry.screen_id,
            dst_id: geometry.dst_id,
            mask_id: SOLID_FILL_MASK,
            dst_rect: [geometry.x0, geometry.y0, geometry.x1, geometry.y1],
            mask_point: [0, 0],
            src_point: [0, 0],
        };
        if !batcher.push_draw(&copy_cmd) {
            flush_batch(
                &mut batcher,
                &mut self.conn,
                &mut pending_writes,
                &mut batches,
                &mut bytes_sent,
                self.depth.depth(),
            )?;
            batcher.push_draw(&copy_cmd);
        }

        for rect in border_rects(&geometry) {
            let cmd = DrawCommand {
                screen_id: geometry.screen_id,
                dst_id: geometry.dst_id,
                mask_id: SOLID_FILL_MASK,
                dst_rect: rect,
                mask_point: [0, 0],
                src_point: [0, 0],
            };
            if !batcher.push_draw(&cmd) {
                flush_batch(
                    &mut batcher,
                    &mut self.conn,
                    &mut pending_writes,
                    &mut batches,
                    &mut bytes_sent,
                    self.depth.depth(),
                )?;
                batcher.push_draw(&cmd);
            }
        }
        batcher.push_flush();

        let send_done = Instant::now();
        let result = flush_batch(
            &mut batcher,
            &mut self.conn,
            &mut pending_writes,
            &mut batches,
            &mut bytes_sent,
            self.depth.depth(),
        );

        if let Err(err) = &result {
            warn!(target: "sender", error = %err, "write_failed_forcing_full_refresh");
            self.invalidate();
            if matches!(err, SendError::Wire(WireError::UnknownId)) {
                self.unknown_id_streak += 1;
                if self.unknown_id_streak >= self.config.unknown_id_retry_threshold {
                    self.geometry = None;
                    self.unknown_id_streak = 0;
                }
            }
            return result.map(|_| true);
        }
        self.unknown_id_streak = 0;

        while pending_writes > 0 {
            self.conn.recv_response()?;
            pending_writes -= 1;
        }
        let recv_done = Instant::now();

        let send_time = send_done.duration_since(frame_start);
        let drain_time = recv_done.duration_since(send_done);
        self.depth.update(send_time, drain_time, batches);

        for tile in &transmitted_tiles {
            for y in tile.y0..tile.y1 {
                let src = &active.row(y)[tile.x0 as usize..tile.x1 as usize];
                self.previous.row_mut(y)[tile.x0 as usize..tile.x1 as usize].copy_from_slice(src);
            }
        }
        if do_full {
            self.previous_valid = true;
            self.stats.full_frames.fetch_add(1, Ordering::Relaxed);
        }

        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_sent.fetch_add(bytes_sent, Ordering::Relaxed);
        self.stats.tiles_sent.fetch_add(tiles_sent, Ordering::Relaxed);
        debug!(
            target: "sender",
            tiles = tiles_sent,
            bytes = bytes_sent,
            full = do_full,
            depth = self.depth.depth(),
            "frame_sent"
        );
        Ok(true)
    }
}

fn border_rects(geometry: &WindowGeometry) -> [[i32; 4]; 4] {
    let WindowGeometry { x0, y0, x1, y1, .. } = *geometry;
    [
        [x0, y0, x1, y0 + BORDER_THICKNESS],       // top
        [x0, y1 - BORDER_THICKNESS, x1, y1],       // bottom
        [x0, y0, x0 + BORDER_THICKNESS, y1],       // left
        [x1 - BORDER_THICKNESS, y0, x1, y1],       // right
    ]
}

/// Runs [`FrameSender::send_frame`] in a loop against a [`FrameQueue`],
/// waking every time a frame is published, every 2 seconds to probe the
/// remote end, or when told to stop. Meant to be the entire body of the
/// sender thread; the periodic wake doubles as the spec's probe interval
/// since [`FrameQueue::take_active`] already times out at that cadence.
pub fn run_sender_loop<C: Plan9Conn, W: RemoteWindow>(
    sender: &mut FrameSender<C, W>,
    queue: &FrameQueue,
    window_changed: &std::sync::atomic::AtomicBool,
    should_continue: impl Fn() -> bool,
) {
    const PROBE_INTERVAL: Duration = Duration::from_secs(2);
    while should_continue() {
        let Some(active) = queue.take_active(PROBE_INTERVAL) else {
            if let Err(err) = sender.conn.write_batch(&[core_wire::OP_FLUSH]) {
                warn!(target: "sender", error = %err, "probe_failed");
            }
            continue;
        };
        let changed = window_changed.swap(false, Ordering::AcqRel);
        if let Err(err) = sender.send_frame(&active, changed, false) {
            warn!(target: "sender", error = %err, "frame_send_failed");
        }
        queue.release_active();
    }
}
