use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Opaque index into a collection owned by the resource collaborator.
/// The renderer never looks behind it, only passes it through to draws.
pub struct Handle<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

// Manual impls so `T` needs none of these traits itself.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_name = std::any::type_name::<T>();
        let short = type_name.rsplit("::").next().unwrap_or(type_name);
        write!(f, "Handle<{short}>({})", self.index)
    }
}

impl<T> Handle<T> {
    pub const fn new(index: usize) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub const fn index(&self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NotCopy;

    #[test]
    fn handle_is_copy_without_bounds_on_target() {
        let h1: Handle<NotCopy> = Handle::new(5);
        let h2 = h1;
        let h3 = h1;
        assert_eq!(h1, h2);
        assert_eq!(h2.index(), h3.index());
    }

    #[test]
    fn debug_names_the_target_type() {
        let handle: Handle<NotCopy> = Handle::new(3);
        assert_eq!(format!("{handle:?}"), "Handle<NotCopy>(3)");
    }
}
