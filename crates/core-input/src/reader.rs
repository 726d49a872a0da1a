//! The three blocking reader loops that own a remote input file each:
//! mouse, keyboard, and the window-control poller. Each is meant to be the
//! entire body of a dedicated OS thread; the binary crate supplies the
//! already-opened file (or an open/read/close closure for `wctl`, which is
//! polled rather than held open).

use crate::frame::{KeyboardTranslator, WindowBounds, parse_mouse_frame, parse_wctl_frame};
use crate::ring::InputRing;
use core_events::InputEvent;
use std::io::{self, BufRead, BufReader, Read};
use std::time::Duration;
use tracing::{trace, warn};

/// Blocking mouse-frame reader loop. Returns once the reader hits EOF or
/// errors.
pub fn run_mouse_reader<R: Read>(reader: R, ring: &InputRing) -> io::Result<()> {
    let mut lines = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        if lines.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let Some(frame) = parse_mouse_frame(line.trim_end()) else {
            continue;
        };
        if frame.resize {
            trace!(target: "input.mouse", "resize_frame_ignored");
            continue;
        }
        ring.push(InputEvent::Mouse {
            x: frame.x,
            y: frame.y,
            buttons: frame.buttons,
            scroll: frame.scroll,
        });
    }
}

/// Blocking keyboard-frame reader loop over NUL-delimited `/dev/kbd`-style
/// messages.
pub fn run_keyboard_reader<R: Read>(mut reader: R, ring: &InputRing) -> io::Result<()> {
    let mut translator = KeyboardTranslator::new();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        while let Some(pos) = buf.iter().position(|&b| b == 0) {
            let message: Vec<u8> = buf.drain(..=pos).collect();
            let message = &message[..message.len() - 1];
            let Ok(text) = std::str::from_utf8(message) else {
                continue;
            };
            for event in translator.process(text) {
                ring.push(InputEvent::Key(event));
            }
        }
    }
}

/// Poll window bounds every 50ms via a fresh open-read each time (never
/// holding the file open). `on_change` fires once a baseline is set and a
/// later read differs from it. `should_continue` lets callers bound the
/// loop in tests; production callers pass `|| true`.
pub fn run_wctl_poller<F, C>(
    mut open_and_read: F,
    mut on_change: C,
    mut should_continue: impl FnMut() -> bool,
) where
    F: FnMut() -> io::Result<String>,
    C: FnMut(WindowBounds),
{
    let mut baseline: Option<WindowBounds> = None;
    while should_continue() {
        match open_and_read() {
            Ok(text) => {
                if let Some(bounds) = parse_wctl_frame(text.trim()) {
                    match baseline {
                        None => baseline = Some(bounds),
                        Some(prev) if prev != bounds => {
                            baseline = Some(bounds);
                            on_change(bounds);
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => warn!(target: "input.wctl", error = %e, "wctl_read_failed"),
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
