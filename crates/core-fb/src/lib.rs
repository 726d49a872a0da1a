//! Framebuffer, tile geometry and the double-buffered frame queue.

mod framebuffer;
mod queue;
mod tile;

pub use framebuffer::{Framebuffer, SENTINEL_PIXEL};
pub use queue::FrameQueue;
pub use tile::{Tile, TILE_SIZE};
