use std::ops::{Index, IndexMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable reference into a [`SlotStorage`].
/// A handle outlives the value it points at: once the slot is released the
/// handle resolves to `None`, even when the slot gets reused.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SlotHandle {
    index: u32,
    generation: u32,
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for SlotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
pub struct SlotStorage<T> {
    storage: Vec<Option<T>>,
    generations: Vec<u32>,
    empty_slots: Vec<u32>,
    active: usize,
}

impl<T> Default for SlotStorage<T> {
    fn default() -> Self {
        Self {
            storage: Vec::new(),
            generations: Vec::new(),
            empty_slots: Vec::new(),
            active: 0,
        }
    }
}

impl<T> SlotStorage<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: Vec::with_capacity(capacity),
            generations: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    pub fn push(&mut self, val: T) -> SlotHandle {
        self.active += 1;

        if let Some(index) = self.empty_slots.pop() {
            let i = index as usize;
            self.storage[i] = Some(val);
            return SlotHandle {
                index,
                generation: self.generations[i],
            };
        }

        let index = self.storage.len() as u32;
        self.storage.push(Some(val));
        self.generations.push(0);
        SlotHandle {
            index,
            generation: 0,
        }
    }

    /// Releases the slot and returns its value.
    /// The slot's generation is bumped so outstanding handles go stale.
    pub fn erase(&mut self, handle: SlotHandle) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }

        let i = handle.index();
        let val = self.storage[i].take();
        self.generations[i] = self.generations[i].wrapping_add(1);
        self.empty_slots.push(handle.index);
        self.active -= 1;
        val
    }

    pub fn contains(&self, handle: SlotHandle) -> bool {
        let i = handle.index();
        match self.generations.get(i) {
            Some(generation) => *generation == handle.generation && self.storage[i].is_some(),
            None => false,
        }
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&T> {
        if self.contains(handle) {
            self.storage[handle.index()].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut T> {
        if self.contains(handle) {
            self.storage[handle.index()].as_mut()
        } else {
            None
        }
    }

    pub fn iter(&self) -> SlotIterator<'_, T> {
        SlotIterator {
            storage: self.storage.as_slice(),
            generations: self.generations.as_slice(),
            current: 0,
        }
    }

    pub fn clear(&mut self) {
        for (i, slot) in self.storage.iter_mut().enumerate() {
            if slot.take().is_some() {
                self.generations[i] = self.generations[i].wrapping_add(1);
                self.empty_slots.push(i as u32);
            }
        }
        self.active = 0;
    }
}

pub struct SlotIterator<'a, T> {
    storage: &'a [Option<T>],
    generations: &'a [u32],
    current: usize,
}

impl<'a, T> Iterator for SlotIterator<'a, T> {
    type Item = (SlotHandle, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while self.current < self.storage.len() {
            let i = self.current;
            self.current += 1;

            if let Some(val) = self.storage[i].as_ref() {
                let handle = SlotHandle {
                    index: i as u32,
                    generation: self.generations[i],
                };
                return Some((handle, val));
            }
        }
        None
    }
}

impl<T> Index<SlotHandle> for SlotStorage<T> {
    type Output = T;

    fn index(&self, handle: SlotHandle) -> &Self::Output {
        match self.get(handle) {
            Some(val) => val,
            None => panic!("handle {} was not active", handle),
        }
    }
}

impl<T> IndexMut<SlotHandle> for SlotStorage<T> {
    fn index_mut(&mut self, handle: SlotHandle) -> &mut Self::Output {
        match self.get_mut(handle) {
            Some(val) => val,
            None => panic!("handle {} was not active", handle),
        }
    }
}
