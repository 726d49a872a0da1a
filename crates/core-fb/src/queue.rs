use crate::Framebuffer;
use std::sync::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    None,
    Pending,
    Active,
}

/// Double-buffered hand-off between the scene renderer (producer, called
/// from the compositor's commit/render path) and the sender thread
/// (consumer).
///
/// Two framebuffers plus two slot markers. The producer copies the live
/// framebuffer into whichever slot is neither pending nor active; if none is
/// free it drops the frame. The consumer moves pending into active.
pub struct FrameQueue {
    inner: Mutex<Inner>,
    ready: Condvar,
}

struct Inner {
    buffers: [Framebuffer; 2],
    slots: [Slot; 2],
    pending: Option<usize>,
    active: Option<usize>,
}

impl FrameQueue {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffers: [Framebuffer::new(width, height), Framebuffer::new(width, height)],
                slots: [Slot::None, Slot::None],
                pending: None,
                active: None,
            }),
            ready: Condvar::new(),
        }
    }

    /// Producer side: copy `live` into a free slot and mark it pending.
    /// Returns `false` if no slot was free (the frame was dropped).
    pub fn publish(&self, live: &Framebuffer) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let free = inner
            .slots
            .iter()
            .position(|s| *s == Slot::None)
            .or_else(|| {
                // A slot that is neither pending nor active is free even if it
                // still holds stale content from a previously consumed frame.
                let Inner { pending, active, .. } = *inner;
                (0..2).find(|i| Some(*i) != pending && Some(*i) != active)
            });

        let Some(idx) = free else {
            return false;
        };

        inner.buffers[idx].copy_from(live);
        inner.slots[idx] = Slot::Pending;
        inner.pending = Some(idx);
        self.ready.notify_one();
        true
    }

    /// Consumer side: move pending into active, returning a clone of the
    /// buffer for the sender to work from. Blocks up to `timeout` waiting for
    /// a pending frame; returns `None` on timeout.
    pub fn take_active(&self, timeout: std::time::Duration) -> Option<Framebuffer> {
        let mut inner = self.inner.lock().unwrap();
        if inner.pending.is_none() {
            let (guard, result) = self
                .ready
                .wait_timeout_while(inner, timeout, |i| i.pending.is_none())
                .unwrap();
            inner = guard;
            if result.timed_out() && inner.pending.is_none() {
                return None;
            }
        }

        let idx = inner.pending.take()?;
        inner.slots[idx] = Slot::Active;
        inner.active = Some(idx);
        Some(inner.buffers[idx].clone())
    }

    /// Release the active slot once the sender has finished with it.
    pub fn release_active(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(idx) = inner.active.take() {
            inner.slots[idx] = Slot::None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_take_round_trips() {
        let q = FrameQueue::new(4, 4);
        let mut live = Framebuffer::new(4, 4);
        live.set(0, 0, 42);
        assert!(q.publish(&live));
        let active = q.take_active(std::time::Duration::from_millis(10)).unwrap();
        assert_eq!(active.get(0, 0), 42);
        q.release_active();
    }

    #[test]
    fn take_active_times_out_with_nothing_pending() {
        let q = FrameQueue::new(4, 4);
        assert!(q
            .take_active(std::time::Duration::from_millis(5))
            .is_none());
    }

    #[test]
    fn publish_drops_frame_when_no_slot_free() {
        let q = FrameQueue::new(2, 2);
        let live = Framebuffer::new(2, 2);
        assert!(q.publish(&live));
        let _active = q.take_active(std::time::Duration::from_millis(10)).unwrap();
        // active slot occupied, pending slot just consumed and now free again
        assert!(q.publish(&live));
        // now both slots occupied (one active, one pending) -> next publish drops
        assert!(!q.publish(&live));
    }
}
