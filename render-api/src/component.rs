//! Shared component ownership with non-owning observers.
//!
//! The scene layer owns components through [`Component`]; renderers only ever hold a
//! [`ComponentRef`], which never keeps the component alive. Identity is a [`ComponentId`]
//! assigned once at creation, so two references compare equal exactly when they observe the
//! same component, whatever their own addresses are.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identity of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Slot<T> {
    id: ComponentId,
    value: RefCell<T>,
}

/// Owning handle to a scene component. Clones share the same component.
pub struct Component<T> {
    slot: Rc<Slot<T>>,
}

impl<T> Component<T> {
    pub fn new(value: T) -> Self {
        Self {
            slot: Rc::new(Slot {
                id: ComponentId::next(),
                value: RefCell::new(value),
            }),
        }
    }

    pub fn id(&self) -> ComponentId {
        self.slot.id
    }

    /// Panics if the component is currently borrowed mutably.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.slot.value.borrow()
    }

    /// Panics if the component is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.slot.value.borrow_mut()
    }

    pub fn downgrade(&self) -> ComponentRef<T> {
        ComponentRef {
            id: self.slot.id,
            slot: Rc::downgrade(&self.slot),
        }
    }
}

impl<T> Clone for Component<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Component<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.slot.id)
            .field("value", &self.slot.value)
            .finish()
    }
}

/// Non-owning observer of a [`Component`].
pub struct ComponentRef<T> {
    id: ComponentId,
    slot: Weak<Slot<T>>,
}

impl<T> ComponentRef<T> {
    /// Identity of the observed component; still valid after the component is dropped.
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.slot.strong_count() > 0
    }

    pub fn upgrade(&self) -> Option<Component<T>> {
        self.slot.upgrade().map(|slot| Component { slot })
    }

    /// True when both references observe the same component.
    pub fn same_component(&self, other: &ComponentRef<T>) -> bool {
        self.id == other.id
    }
}

impl<T> Clone for ComponentRef<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            slot: Weak::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for ComponentRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRef")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = Component::new(1u32);
        let b = Component::new(1u32);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
    }

    #[test]
    fn reference_expires_with_last_owner() {
        let owner = Component::new(String::from("mesh"));
        let observer = owner.downgrade();
        let second = owner.clone();
        drop(owner);
        assert!(observer.is_alive());
        drop(second);
        assert!(!observer.is_alive());
        assert!(observer.upgrade().is_none());
    }

    #[test]
    fn references_compare_by_component() {
        let a = Component::new(0.5f32);
        let b = Component::new(0.5f32);
        assert!(a.downgrade().same_component(&a.downgrade()));
        assert!(!a.downgrade().same_component(&b.downgrade()));
    }

    #[test]
    fn upgrade_sees_mutations() {
        let owner = Component::new(vec![1, 2]);
        let observer = owner.downgrade();
        owner.borrow_mut().push(3);
        let seen = observer.upgrade().map(|c| c.borrow().len());
        assert_eq!(seen, Some(3));
    }
}
