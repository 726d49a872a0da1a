//! Shared event vocabulary for the compositor's concurrency spine.
//!
//! Every long-lived thread (sender, input readers, window-control poller,
//! clipboard paste threads) and the calloop-driven main loop communicate
//! through the [`Event`] enum defined here plus a handful of per-subsystem
//! telemetry counters. Nothing in this crate owns a channel: callers wire
//! `Event` values through whatever transport fits (ring buffer, mpsc,
//! calloop callback return value).

use std::sync::atomic::AtomicU64;

bitflags::bitflags! {
    /// Rune-derived modifier state tracked by keyboard translation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModMask: u8 {
        const SHIFT = 0b0000_0001;
        const CTRL  = 0b0000_0010;
        const ALT   = 0b0000_0100;
        const SUPER = 0b0000_1000;
    }
}

/// A 32-bit Plan 9 rune: either a Unicode scalar value (< 0xF000) or a
/// Plan-9-specific key identifier (>= 0xF000).
pub type Rune = u32;

/// Named, non-Unicode key identifiers in the reserved 0xF000..=0xF8FF rune band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    Function(u8),
    Other(u32),
}

impl NamedKey {
    /// Decode a rune known to lie in the special band into a [`NamedKey`].
    pub fn from_rune(rune: Rune) -> Self {
        match rune {
            0xF00E => NamedKey::Up,
            0xF00F => NamedKey::Down,
            0xF011 => NamedKey::Left,
            0xF012 => NamedKey::Right,
            0xF00A => NamedKey::Home,
            0xF00B => NamedKey::End,
            0xF00C => NamedKey::PageUp,
            0xF00D => NamedKey::PageDown,
            0xF018 => NamedKey::Insert,
            0xF019 => NamedKey::Delete,
            r @ 0xF020..=0xF02B => NamedKey::Function((r - 0xF020 + 1) as u8),
            other => NamedKey::Other(other),
        }
    }
}

/// A single key token as surfaced to the compositor, independent of modifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyToken {
    Char(char),
    Named(NamedKey),
}

/// Decoded key event carrying press/release direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub token: KeyToken,
    pub pressed: bool,
    pub mods: ModMask,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MouseButtons: u8 {
        const LEFT   = 0b0000_0001;
        const MIDDLE = 0b0000_0010;
        const RIGHT  = 0b0000_0100;
    }
}

/// Discrete scroll ticks reported alongside a mouse frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollTicks {
    pub up: u32,
    pub down: u32,
    pub left: u32,
    pub right: u32,
}

/// Events carried on the input ring between reader threads and the main loop.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Mouse {
        x: i32,
        y: i32,
        buttons: MouseButtons,
        scroll: ScrollTicks,
    },
    Key(KeyEvent),
}

/// Top-level event consumed by the main loop.
#[derive(Debug, Clone)]
pub enum Event {
    Input(InputEvent),
    /// A local selection-copy produced bytes that should be mirrored to the remote snarf file.
    ClipboardCopy(String),
    /// A remote paste request landed and was serviced (for telemetry only; the bytes
    /// already went straight to the requesting client's fd on the paste thread).
    ClipboardPasteServed { bytes: usize },
    /// `/dev/wctl` observed a change in window bounds.
    WindowChanged { x0: i32, y0: i32, x1: i32, y1: i32 },
    /// A frame finished compositing locally and is ready for the sender to pick up.
    FrameReady,
    /// Periodic monotonic tick, used as the sender's 2s probe/backstop timer.
    Tick,
    Shutdown,
}

/// Optional hooks observing events at the main-loop boundary. Default is a no-op,
/// mirroring the teacher's `EventHooks` scaffold.
pub trait EventHooks: Send + Sync + 'static {
    fn pre_handle(&self, _event: &Event) {}
    fn post_handle(&self, _event: &Event) {}
}

pub struct NoopEventHooks;
impl EventHooks for NoopEventHooks {}

// -------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------
// Plain relaxed atomics, inspected in tests and periodically logged by the
// binary; no locking, matching the teacher's counter style.

pub static RING_OVERFLOWS: AtomicU64 = AtomicU64::new(0);
pub static RING_PUSHES: AtomicU64 = AtomicU64::new(0);
pub static KEYPRESS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static KEYRELEASE_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static MOUSE_FRAMES_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static PASTE_SESSIONS: AtomicU64 = AtomicU64::new(0);
pub static PASTE_BYTES: AtomicU64 = AtomicU64::new(0);
pub static PASTE_TRUNCATED: AtomicU64 = AtomicU64::new(0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_key_decodes_arrow_band() {
        assert_eq!(NamedKey::from_rune(0xF00E), NamedKey::Up);
        assert_eq!(NamedKey::from_rune(0xF00F), NamedKey::Down);
    }

    #[test]
    fn named_key_decodes_function_band() {
        assert_eq!(NamedKey::from_rune(0xF020), NamedKey::Function(1));
        assert_eq!(NamedKey::from_rune(0xF023), NamedKey::Function(4));
    }

    #[test]
    fn mod_mask_combines() {
        let m = ModMask::CTRL | ModMask::SHIFT;
        assert!(m.contains(ModMask::CTRL));
        assert!(!m.contains(ModMask::ALT));
    }
}
