//! Generational arena and the read-only query boundary onto the Wayland
//! scene graph. Surfaces, popups and toplevels are addressed by opaque
//! [`SceneHandle`]s rather than by pointer, so cross-references (surface to
//! popup record, popup record to scene node) survive being stored on either
//! side without lifetime entanglement.

/// Opaque reference to a scene-graph node. Carries a generation so a handle
/// into a freed and reused slot is detected rather than silently aliasing
/// the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle {
    index: u32,
    generation: u32,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Owns a set of `T`, handing out and validating [`SceneHandle`]s.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> SceneHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation += 1;
            slot.value = Some(value);
            SceneHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            SceneHandle {
                index,
                generation: 0,
            }
        }
    }

    pub fn remove(&mut self, handle: SceneHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take();
        if value.is_some() {
            self.free.push(handle.index);
        }
        value
    }

    pub fn get(&self, handle: SceneHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: SceneHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn contains(&self, handle: SceneHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SceneHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value.as_ref().map(|v| {
                (
                    SceneHandle {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    v,
                )
            })
        })
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Axis-aligned rectangle in compositor-space pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

/// Read-only queries the rest of the system needs against the live scene
/// graph. Implemented by the real Wayland compositor state in the binary
/// crate; tests and other subsystems depend only on this trait.
pub trait SceneQuery {
    fn surface_geometry(&self, handle: SceneHandle) -> Option<Rect>;
    fn is_toplevel(&self, handle: SceneHandle) -> bool;
    fn is_mapped(&self, handle: SceneHandle) -> bool;
}
