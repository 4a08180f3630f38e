//! Typed, generation-checked handles to backend resources.

use std::{
    cmp::Ordering,
    fmt::{Debug, Formatter},
    hash::{Hash, Hasher},
    marker::PhantomData,
};

/// Marker trait for the kinds of resource a backend hands out handles to.
pub trait Resource: 'static {
    /// Name used in logs and error messages.
    const NAME: &'static str;
}

macro_rules! resource_kinds {
    ($($(#[$meta:meta])* $kind:ident => $name:literal, $alias:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum $kind {}

            impl Resource for $kind {
                const NAME: &'static str = $name;
            }

            #[doc = concat!("Handle to a ", $name, ".")]
            pub type $alias = Handle<$kind>;
        )*
    };
}

resource_kinds! {
    /// Sampled RGB8 image, usable as a color attachment.
    Texture => "texture", TextureHandle;
    /// Non-sampled depth24 + stencil8 attachment storage.
    Renderbuffer => "renderbuffer", RenderbufferHandle;
    /// Color + depth/stencil attachment pair.
    Framebuffer => "framebuffer", FramebufferHandle;
    /// Shader program.
    ProgramObject => "program", ProgramHandle;
    /// Buffer of `[f32; 3]` vertex positions.
    VertexBuffer => "vertex buffer", VertexBufferHandle;
}

/// Handle to a backend resource.
///
/// Handles are plain values: copying one never extends the lifetime of the
/// resource behind it.
pub struct Handle<T: Resource> {
    pub(crate) generation: u32,
    pub(crate) index: u32,
    _marker: PhantomData<T>,
}

impl<T: Resource> Handle<T> {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self {
            generation,
            index,
            _marker: PhantomData,
        }
    }

    /// Slot index of the handle.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T: Resource> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T: Resource> Eq for Handle<T> {}

impl<T: Resource> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Resource> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // First compare generations then indices.
        self.generation
            .cmp(&other.generation)
            .then(self.index.cmp(&other.index))
    }
}

impl<T: Resource> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T: Resource> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Resource> Copy for Handle<T> {}

impl<T: Resource> Debug for Handle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &T::NAME)
            .field("idx", &self.index)
            .field("gen", &self.generation)
            .finish()
    }
}

/// Slot storage addressed by handles.
///
/// Removing an entry bumps the slot generation so stale handles stop
/// resolving; freed slots are reused before the storage grows.
pub struct HandleMap<T: Resource, V> {
    slots: Vec<Slot<V>>,
    free: Vec<u32>,
    len: usize,
    _marker: PhantomData<T>,
}

struct Slot<V> {
    generation: u32,
    value: Option<V>,
}

impl<T: Resource, V> HandleMap<T, V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Stores a value and returns the handle addressing it.
    pub fn insert(&mut self, value: V) -> Handle<T> {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle::new(index, 0)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&V> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut V> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Removes the value behind `handle`, invalidating every copy of it.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<V> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over live entries.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &V)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|v| (Handle::new(i as u32, slot.generation), v))
        })
    }
}

impl<T: Resource, V> Default for HandleMap<T, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_does_not_resolve_after_reuse() {
        let mut map = HandleMap::<Texture, &str>::new();
        let a = map.insert("a");
        assert_eq!(map.remove(a), Some("a"));
        let b = map.insert("b");
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(map.get(a).is_none());
        assert_eq!(map.get(b), Some(&"b"));
        assert!(map.remove(a).is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn iter_skips_removed_slots() {
        let mut map = HandleMap::<ProgramObject, u32>::new();
        let a = map.insert(1);
        let _b = map.insert(2);
        map.remove(a);
        let values: Vec<_> = map.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![2]);
        assert!(!map.is_empty());
    }
}
