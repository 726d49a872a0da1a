//! Parsing for the two message formats delivered by the remote's input
//! files: `/dev/mouse` frames and `/dev/kbd` frames.

use core_events::{KeyEvent, KeyToken, ModMask, MouseButtons, NamedKey, ScrollTicks};
use std::collections::HashSet;

/// One decoded `/dev/mouse` frame: a pointer sample (`'m'`) or a screen
/// resize notification (`'r'`), sharing the same `x y buttons` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseFrame {
    pub x: i32,
    pub y: i32,
    pub buttons: MouseButtons,
    pub scroll: ScrollTicks,
    pub resize: bool,
}

/// Parse one `'m' x y buttons` or `'r' x y buttons` line. Bits 0-2 are the
/// left/middle/right buttons; bits 3-6 are discrete scroll ticks
/// (up/down/left/right).
pub fn parse_mouse_frame(line: &str) -> Option<MouseFrame> {
    let mut chars = line.chars();
    let tag = chars.next()?;
    if tag != 'm' && tag != 'r' {
        return None;
    }
    let mut fields = chars.as_str().split_ascii_whitespace();
    let x: i32 = fields.next()?.parse().ok()?;
    let y: i32 = fields.next()?.parse().ok()?;
    let bits: u32 = fields.next()?.parse().ok()?;

    let mut buttons = MouseButtons::empty();
    if bits & 0x01 != 0 {
        buttons |= MouseButtons::LEFT;
    }
    if bits & 0x02 != 0 {
        buttons |= MouseButtons::MIDDLE;
    }
    if bits & 0x04 != 0 {
        buttons |= MouseButtons::RIGHT;
    }

    let mut scroll = ScrollTicks::default();
    if bits & 0x08 != 0 {
        scroll.up += 1;
    }
    if bits & 0x10 != 0 {
        scroll.down += 1;
    }
    if bits & 0x20 != 0 {
        scroll.left += 1;
    }
    if bits & 0x40 != 0 {
        scroll.right += 1;
    }

    Some(MouseFrame {
        x,
        y,
        buttons,
        scroll,
        resize: tag == 'r',
    })
}

/// Baseline and current bounds reported by `/dev/wctl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

/// Parse the four space-separated integers `/dev/wctl` reports.
pub fn parse_wctl_frame(line: &str) -> Option<WindowBounds> {
    let mut fields = line.split_ascii_whitespace();
    let x0 = fields.next()?.parse().ok()?;
    let y0 = fields.next()?.parse().ok()?;
    let x1 = fields.next()?.parse().ok()?;
    let y1 = fields.next()?.parse().ok()?;
    Some(WindowBounds { x0, y0, x1, y1 })
}

/// Runes in the 0xF000 band that carry modifier state instead of their own
/// press/release event. Each listed rune only ever toggles the paired bit;
/// it never reaches the caller as a [`KeyEvent`].
const MODIFIER_RUNES: &[(u32, ModMask)] = &[
    (0xF015, ModMask::SHIFT),
    (0xF016, ModMask::SHIFT),
    (0xF017, ModMask::CTRL),
    (0xF868, ModMask::CTRL),
    (0xF864, ModMask::ALT),
    (0xF865, ModMask::ALT),
    (0xF867, ModMask::SUPER),
];

fn modifier_bit(rune: u32) -> Option<ModMask> {
    MODIFIER_RUNES
        .iter()
        .find(|(r, _)| *r == rune)
        .map(|(_, m)| *m)
}

fn rune_to_token(rune: u32) -> KeyToken {
    if rune >= 0xF000 {
        KeyToken::Named(NamedKey::from_rune(rune))
    } else {
        char::from_u32(rune)
            .map(KeyToken::Char)
            .unwrap_or(KeyToken::Named(NamedKey::Other(rune)))
    }
}

/// Stateful `/dev/kbd` translator: tracks the previously-reported down-set
/// and the live modifier mask across successive reads.
#[derive(Debug, Default)]
pub struct KeyboardTranslator {
    down: HashSet<u32>,
    mods: ModMask,
}

impl KeyboardTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mods(&self) -> ModMask {
        self.mods
    }

    /// Feed one null-terminator-stripped `/dev/kbd` message (`'k'`, `'K'`,
    /// or `'c'` tag followed by UTF-8 runes) and return the key events it
    /// implies. Modifier runes update the mask but never appear here.
    pub fn process(&mut self, message: &str) -> Vec<KeyEvent> {
        let mut chars = message.chars();
        let Some(tag) = chars.next() else {
            return Vec::new();
        };
        let runes: Vec<u32> = chars.as_str().chars().map(|c| c as u32).collect();

        match tag {
            'k' => self.apply_down_set(&runes),
            'K' => self.apply_up_set(&runes),
            'c' => runes
                .into_iter()
                .flat_map(|r| self.literal_press_release(r))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn literal_press_release(&mut self, rune: u32) -> Vec<KeyEvent> {
        if let Some(bit) = modifier_bit(rune) {
            self.mods |= bit;
            return Vec::new();
        }
        let token = rune_to_token(rune);
        vec![
            KeyEvent {
                token,
                pressed: true,
                mods: self.mods,
            },
            KeyEvent {
                token,
                pressed: false,
                mods: self.mods,
            },
        ]
    }

    fn apply_down_set(&mut self, new_runes: &[u32]) -> Vec<KeyEvent> {
        let new_set: HashSet<u32> = new_runes.iter().copied().collect();
        let mut events = Vec::new();

        for &rune in &new_set {
            if let Some(bit) = modifier_bit(rune) {
                self.mods |= bit;
                continue;
            }
            if !self.down.contains(&rune) {
                events.push(KeyEvent {
                    token: rune_to_token(rune),
                    pressed: true,
                    mods: self.mods,
                });
            }
        }
        for &rune in &self.down {
            if modifier_bit(rune).is_some() {
                continue;
            }
            if !new_set.contains(&rune) {
                events.push(KeyEvent {
                    token: rune_to_token(rune),
                    pressed: false,
                    mods: self.mods,
                });
            }
        }
        self.down = new_set;
        events
    }

    fn apply_up_set(&mut self, up_runes: &[u32]) -> Vec<KeyEvent> {
        let mut events = Vec::new();
        for &rune in up_runes {
            if let Some(bit) = modifier_bit(rune) {
                self.mods.remove(bit);
                continue;
            }
            self.down.remove(&rune);
            events.push(KeyEvent {
                token: rune_to_token(rune),
                pressed: false,
                mods: self.mods,
            });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pointer_frame_with_left_button() {
        let frame = parse_mouse_frame("m 100 200 1").unwrap();
        assert_eq!(frame.x, 100);
        assert_eq!(frame.y, 200);
        assert!(frame.buttons.contains(MouseButtons::LEFT));
        assert!(!frame.resize);
    }

    #[test]
    fn parses_scroll_ticks_from_high_bits() {
        let frame = parse_mouse_frame("m 0 0 8").unwrap();
        assert_eq!(frame.scroll.up, 1);
        assert_eq!(frame.scroll.down, 0);
    }

    #[test]
    fn resize_tag_is_flagged() {
        let frame = parse_mouse_frame("r 10 10 0").unwrap();
        assert!(frame.resize);
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(parse_mouse_frame("x 0 0 0").is_none());
    }

    #[test]
    fn parses_wctl_bounds() {
        let bounds = parse_wctl_frame("0 0 1920 1080").unwrap();
        assert_eq!(bounds, WindowBounds { x0: 0, y0: 0, x1: 1920, y1: 1080 });
    }

    #[test]
    fn down_then_up_diff_yields_press_then_release() {
        let mut t = KeyboardTranslator::new();
        let a = 'a' as u32;
        let pressed = t.process("ka");
        assert_eq!(pressed.len(), 1);
        assert!(pressed[0].pressed);
        assert!(matches!(pressed[0].token, KeyToken::Char('a')));

        let released = t.process("k");
        assert_eq!(released.len(), 1);
        assert!(!released[0].pressed);
        let _ = a;
    }

    #[test]
    fn explicit_up_message_releases_without_waiting_for_diff() {
        let mut t = KeyboardTranslator::new();
        t.process("ka");
        let released = t.process("Ka");
        assert_eq!(released.len(), 1);
        assert!(!released[0].pressed);
    }

    #[test]
    fn modifier_runes_update_mask_without_emitting_events() {
        let mut t = KeyboardTranslator::new();
        let events = t.process(&format!("k{}", char::from_u32(0xF017).unwrap()));
        assert!(events.is_empty());
        assert!(t.mods().contains(ModMask::CTRL));
    }

    #[test]
    fn literal_fallback_emits_press_then_release() {
        let mut t = KeyboardTranslator::new();
        let events = t.process("cz");
        assert_eq!(events.len(), 2);
        assert!(events[0].pressed);
        assert!(!events[1].pressed);
    }

    #[test]
    fn named_key_band_decodes_through_events() {
        let mut t = KeyboardTranslator::new();
        let events = t.process(&format!("k{}", char::from_u32(0xF00E).unwrap()));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].token, KeyToken::Named(NamedKey::Up)));
    }
}
