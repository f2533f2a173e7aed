//! Type-keyed side channel for passing plain data between passes

use bytemuck::Pod;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

struct BlackboardEntry {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Holds at most one value per type.
///
/// Values must be [`Pod`]: the blackboard is a flat box of plain data, never an owner of
/// GPU objects or other resources.
#[derive(Default)]
pub struct Blackboard {
    entries: HashMap<TypeId, BlackboardEntry>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the value of type T.
    pub fn add<T: Pod + Send + Sync>(&mut self, value: T) {
        self.entries.insert(
            TypeId::of::<T>(),
            BlackboardEntry {
                value: Box::new(value),
                type_name: type_name::<T>(),
            },
        );
    }

    /// Inserts a zeroed T, replacing any previous value, and returns it for filling in.
    pub fn create<T: Pod + Send + Sync>(&mut self) -> &mut T {
        self.add(T::zeroed());
        self.get_mut::<T>()
    }

    /// Panics if no T was added.
    pub fn get<T: Pod>(&self) -> &T {
        self.try_get::<T>()
            .unwrap_or_else(|| panic!("Blackboard entry `{}` does not exist", type_name::<T>()))
    }

    /// Panics if no T was added.
    pub fn get_mut<T: Pod>(&mut self) -> &mut T {
        self.try_get_mut::<T>()
            .unwrap_or_else(|| panic!("Blackboard entry `{}` does not exist", type_name::<T>()))
    }

    pub fn try_get<T: Pod>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_ref::<T>())
    }

    pub fn try_get_mut<T: Pod>(&mut self) -> Option<&mut T> {
        self.entries
            .get_mut(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_mut::<T>())
    }

    pub fn contains<T: Pod>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Pod>(&mut self) -> Option<T> {
        let entry = self.entries.remove(&TypeId::of::<T>())?;
        entry.value.downcast::<T>().ok().map(|value| *value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the stored types, for diagnostics
    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.values().map(|entry| entry.type_name)
    }
}

impl std::fmt::Debug for Blackboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.type_names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    struct FrameData {
        frame_index: u32,
        exposure: f32,
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    struct Other {
        value: u64,
    }

    #[test]
    fn test_add_overwrites() {
        let mut blackboard = Blackboard::new();
        blackboard.add(FrameData {
            frame_index: 1,
            exposure: 1.0,
        });
        blackboard.add(FrameData {
            frame_index: 2,
            exposure: 0.5,
        });

        assert_eq!(blackboard.len(), 1);
        assert_eq!(
            *blackboard.get::<FrameData>(),
            FrameData {
                frame_index: 2,
                exposure: 0.5
            }
        );
    }

    #[test]
    fn test_types_are_independent() {
        let mut blackboard = Blackboard::new();
        blackboard.add(Other { value: 7 });
        assert!(blackboard.try_get::<FrameData>().is_none());
        assert_eq!(blackboard.get::<Other>().value, 7);
    }

    #[test]
    fn test_create_zeroes_then_fills() {
        let mut blackboard = Blackboard::new();
        let data = blackboard.create::<FrameData>();
        assert_eq!(data.frame_index, 0);
        data.frame_index = 12;
        assert_eq!(blackboard.get::<FrameData>().frame_index, 12);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut blackboard = Blackboard::new();
        blackboard.add(Other { value: 3 });
        assert_eq!(blackboard.remove::<Other>(), Some(Other { value: 3 }));
        assert!(blackboard.is_empty());

        blackboard.add(Other { value: 4 });
        blackboard.clear();
        assert!(!blackboard.contains::<Other>());
    }

    #[test]
    #[should_panic(expected = "does not exist")]
    fn test_get_missing_panics() {
        let blackboard = Blackboard::new();
        blackboard.get::<FrameData>();
    }
}
