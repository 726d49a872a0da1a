//! Pointer and keyboard focus targets, the popup grab stack, and the
//! deferred-focus slot that holds a pointer-focus change while a button is
//! held. Touched only by the main (Wayland event loop) thread.

use core_scene::SceneHandle;

/// Why a pointer-focus change was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusReason {
    Normal,
    Explicit,
    SurfaceDestroy,
}

/// A pending pointer-focus change, held while a button is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredPointer {
    pub target: Option<SceneHandle>,
    pub surface_x: f64,
    pub surface_y: f64,
}

/// What the caller should do once the held button count reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerRecheck {
    /// Buttons are still held; nothing to do.
    StillHeld,
    /// A deferred change was pending; apply it as pointer focus.
    ApplyDeferred(DeferredPointer),
    /// No deferred change was pending; re-hit-test under the cursor.
    Rediscover,
}

/// Outcome of [`FocusState::handle_click`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Forward the click unchanged to this popup.
    Popup(SceneHandle),
    /// All popups were destroyed; the caller must re-hit-test and retry.
    PopupsDismissed,
    /// This toplevel was raised, activated, and given keyboard focus.
    Toplevel(SceneHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PopupRecord {
    surface: SceneHandle,
}

/// Pointer focus, keyboard focus, popup stack and deferred-pointer slot.
#[derive(Debug, Default)]
pub struct FocusState {
    pointer_focus: Option<SceneHandle>,
    keyboard_focus: Option<SceneHandle>,
    popup_stack: Vec<PopupRecord>,
    toplevels: Vec<SceneHandle>,
    deferred_pointer: Option<DeferredPointer>,
    button_count: u32,
}

impl FocusState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pointer_focus(&self) -> Option<SceneHandle> {
        self.pointer_focus
    }

    pub fn keyboard_focus(&self) -> Option<SceneHandle> {
        self.keyboard_focus
    }

    pub fn set_keyboard_focus(&mut self, target: Option<SceneHandle>) {
        self.keyboard_focus = target;
    }

    /// Request a pointer-focus change. Applied immediately unless a button
    /// is held and `reason` is [`FocusReason::Normal`], in which case the
    /// change is cached in the deferred slot.
    pub fn set_pointer_focus(
        &mut self,
        target: Option<SceneHandle>,
        surface_x: f64,
        surface_y: f64,
        reason: FocusReason,
    ) {
        if self.button_count == 0 || reason != FocusReason::Normal {
            self.pointer_focus = target;
            self.deferred_pointer = None;
        } else {
            self.deferred_pointer = Some(DeferredPointer {
                target,
                surface_x,
                surface_y,
            });
        }
    }

    pub fn button_pressed(&mut self) {
        self.button_count += 1;
    }

    /// Decrement the held-button count, returning what the caller should
    /// do once it reaches zero.
    pub fn button_released(&mut self) -> PointerRecheck {
        self.button_count = self.button_count.saturating_sub(1);
        if self.button_count > 0 {
            return PointerRecheck::StillHeld;
        }
        match self.deferred_pointer.take() {
            Some(deferred) => {
                self.pointer_focus = deferred.target;
                PointerRecheck::ApplyDeferred(deferred)
            }
            None => PointerRecheck::Rediscover,
        }
    }

    /// Add a popup to the head of the grab stack.
    pub fn register_popup(&mut self, surface: SceneHandle) {
        self.popup_stack.insert(0, PopupRecord { surface });
    }

    /// Remove a popup, returning the focus target that should now receive
    /// keyboard focus: the new topmost popup if any remain, else the first
    /// mapped toplevel, else none.
    pub fn unregister_popup(&mut self, surface: SceneHandle) -> Option<SceneHandle> {
        self.popup_stack.retain(|p| p.surface != surface);
        let focus = self.fallback_focus();
        self.keyboard_focus = focus;
        focus
    }

    fn fallback_focus(&self) -> Option<SceneHandle> {
        self.popup_stack
            .first()
            .map(|p| p.surface)
            .or_else(|| self.toplevels.first().copied())
    }

    /// Raise `surface` to the head of the toplevel list.
    pub fn raise_toplevel(&mut self, surface: SceneHandle) {
        self.toplevels.retain(|&s| s != surface);
        self.toplevels.insert(0, surface);
    }

    pub fn click_on_popup(&self, surface: SceneHandle) -> bool {
        self.popup_stack.iter().any(|p| p.surface == surface)
    }

    /// Handle a click on `clicked`: forward unchanged if it's within the
    /// popup stack; dismiss all popups if it's outside one; otherwise raise
    /// and focus the toplevel.
    pub fn handle_click(&mut self, clicked: SceneHandle) -> ClickOutcome {
        if self.click_on_popup(clicked) {
            return ClickOutcome::Popup(clicked);
        }
        if !self.popup_stack.is_empty() {
            tracing::trace!(target: "focus", popups = self.popup_stack.len(), "click_outside_dismisses_popups");
            self.popup_stack.clear();
            return ClickOutcome::PopupsDismissed;
        }
        self.raise_toplevel(clicked);
        self.keyboard_focus = Some(clicked);
        ClickOutcome::Toplevel(clicked)
    }

    /// A surface was mapped. Toplevels are raised and given keyboard focus;
    /// pointer focus still needs a fresh hit-test by the caller.
    pub fn on_map(&mut self, surface: SceneHandle, is_toplevel: bool) {
        if is_toplevel {
            self.raise_toplevel(surface);
            self.keyboard_focus = Some(surface);
        }
    }

    /// A surface was unmapped: drop it from the toplevel/popup lists and
    /// retarget any focus that pointed at it.
    pub fn on_unmap(&mut self, surface: SceneHandle) {
        self.toplevels.retain(|&s| s != surface);
        self.popup_stack.retain(|p| p.surface != surface);
        if self.pointer_focus == Some(surface) {
            self.pointer_focus = self.fallback_focus();
        }
        if self.keyboard_focus == Some(surface) {
            self.keyboard_focus = self.fallback_focus();
        }
    }

    /// A surface was destroyed: same as [`Self::on_unmap`], plus the
    /// deferred-pointer slot is cleared if it referenced this surface.
    pub fn on_destroy(&mut self, surface: SceneHandle) {
        self.on_unmap(surface);
        if let Some(deferred) = &self.deferred_pointer {
            if deferred.target == Some(surface) {
                self.deferred_pointer = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_scene::Arena;

    fn handles(n: usize) -> Vec<SceneHandle> {
        let mut arena: Arena<()> = Arena::new();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn pointer_focus_changes_immediately_with_no_button_held() {
        let h = handles(1);
        let mut f = FocusState::new();
        f.set_pointer_focus(Some(h[0]), 0.0, 0.0, FocusReason::Normal);
        assert_eq!(f.pointer_focus(), Some(h[0]));
    }

    #[test]
    fn pointer_focus_is_deferred_while_button_held() {
        let h = handles(1);
        let mut f = FocusState::new();
        f.button_pressed();
        f.set_pointer_focus(Some(h[0]), 1.0, 2.0, FocusReason::Normal);
        assert_eq!(f.pointer_focus(), None);
        let recheck = f.button_released();
        assert_eq!(
            recheck,
            PointerRecheck::ApplyDeferred(DeferredPointer {
                target: Some(h[0]),
                surface_x: 1.0,
                surface_y: 2.0,
            })
        );
        assert_eq!(f.pointer_focus(), Some(h[0]));
    }

    #[test]
    fn explicit_reason_bypasses_defer_even_with_button_held() {
        let h = handles(1);
        let mut f = FocusState::new();
        f.button_pressed();
        f.set_pointer_focus(Some(h[0]), 0.0, 0.0, FocusReason::Explicit);
        assert_eq!(f.pointer_focus(), Some(h[0]));
    }

    #[test]
    fn rediscover_when_no_deferred_change_pending() {
        let mut f = FocusState::new();
        f.button_pressed();
        assert_eq!(f.button_released(), PointerRecheck::Rediscover);
    }

    #[test]
    fn popup_stack_is_head_topmost_and_falls_back_to_toplevel() {
        let h = handles(3);
        let mut f = FocusState::new();
        f.raise_toplevel(h[2]);
        f.register_popup(h[0]);
        f.register_popup(h[1]);
        // h[1] registered last, so it is head/topmost
        let after_remove_head = f.unregister_popup(h[1]);
        assert_eq!(after_remove_head, Some(h[0]));
        let after_remove_last = f.unregister_popup(h[0]);
        assert_eq!(after_remove_last, Some(h[2]));
    }

    #[test]
    fn click_outside_popup_stack_dismisses_all_popups() {
        let h = handles(2);
        let mut f = FocusState::new();
        f.register_popup(h[0]);
        let outcome = f.handle_click(h[1]);
        assert_eq!(outcome, ClickOutcome::PopupsDismissed);
        assert!(f.popup_stack.is_empty());
    }

    #[test]
    fn click_on_popup_forwards_unchanged() {
        let h = handles(1);
        let mut f = FocusState::new();
        f.register_popup(h[0]);
        assert_eq!(f.handle_click(h[0]), ClickOutcome::Popup(h[0]));
    }

    #[test]
    fn click_on_toplevel_raises_and_focuses() {
        let h = handles(1);
        let mut f = FocusState::new();
        assert_eq!(f.handle_click(h[0]), ClickOutcome::Toplevel(h[0]));
        assert_eq!(f.keyboard_focus(), Some(h[0]));
    }

    #[test]
    fn unmap_retargets_focus_to_fallback() {
        let h = handles(2);
        let mut f = FocusState::new();
        f.raise_toplevel(h[1]);
        f.on_map(h[0], true);
        assert_eq!(f.keyboard_focus(), Some(h[0]));
        f.on_unmap(h[0]);
        assert_eq!(f.keyboard_focus(), Some(h[1]));
    }

    #[test]
    fn destroy_clears_matching_deferred_slot() {
        let h = handles(1);
        let mut f = FocusState::new();
        f.button_pressed();
        f.set_pointer_focus(Some(h[0]), 0.0, 0.0, FocusReason::Normal);
        f.on_destroy(h[0]);
        assert_eq!(f.button_released(), PointerRecheck::Rediscover);
    }
}
