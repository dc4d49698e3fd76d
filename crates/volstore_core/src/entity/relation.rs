//! Relationship slots.

use super::volume::{Volume, WeakVolume};

/// A relationship that may not have been resolved yet.
#[derive(Debug, Clone, Default)]
pub enum Related<T> {
    /// Not resolved. The first access queries the driver.
    #[default]
    Unloaded,
    /// Resolved value.
    Loaded(T),
}

impl<T> Related<T> {
    /// The resolved value, if any.
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Loaded(value) => Some(value),
            Self::Unloaded => None,
        }
    }

    /// Mutable access to the resolved value, if any.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Loaded(value) => Some(value),
            Self::Unloaded => None,
        }
    }

    /// Whether the slot has been resolved.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

/// Link from a snapshot or connection to its volume.
///
/// The link is weak while the volume lists the child, so parent and child
/// never keep each other alive.
#[derive(Debug, Clone, Default)]
pub(crate) enum ParentLink {
    #[default]
    Unloaded,
    Owned(Volume),
    Weak(WeakVolume),
}

impl ParentLink {
    pub(crate) fn resolve(&self) -> Option<Volume> {
        match self {
            Self::Unloaded => None,
            Self::Owned(volume) => Some(volume.clone()),
            Self::Weak(weak) => weak.upgrade(),
        }
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.resolve().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn related_slots() {
        let mut slot: Related<Vec<u32>> = Related::default();
        assert!(!slot.is_loaded());
        assert!(slot.get().is_none());
        slot = Related::Loaded(vec![1]);
        slot.get_mut().unwrap().push(2);
        assert_eq!(slot.get(), Some(&vec![1, 2]));
    }
}
