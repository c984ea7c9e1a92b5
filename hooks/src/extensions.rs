//! Type-keyed extension map attached to connections and message properties.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Mutex,
};

/// Type-keyed map of values attached to a connection or to message properties.
///
/// Cross-cutting tooling (e.g., tracing instrumentations) stores private state here
/// for the lifetime of the owning object instead of keeping an external registry;
/// values are keyed by their Rust type, so independent extensions cannot collide.
/// Each value lives exactly as long as the operation or connection that carries it.
///
/// The map is internally synchronized so that it can be shared across threads.
/// Carrier objects are not shared between concurrent operations, so the lock is
/// never contended in practice.
///
/// # Examples
///
/// ```
/// use warren_hooks::Extensions;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct OperationTag(u64);
///
/// let extensions = Extensions::new();
/// assert!(extensions.insert(OperationTag(1)).is_none());
/// assert_eq!(extensions.get::<OperationTag>(), Some(OperationTag(1)));
/// assert_eq!(extensions.remove::<OperationTag>(), Some(OperationTag(1)));
/// assert!(!extensions.contains::<OperationTag>());
/// ```
#[derive(Default)]
pub struct Extensions {
    values: Mutex<HashMap<TypeId, Box<dyn Any + Send>>>,
}

impl fmt::Debug for Extensions {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.values.lock().map(|values| values.len());
        formatter
            .debug_struct("Extensions")
            .field("len", &len.unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl Extensions {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previously stored value of the same type, if any.
    pub fn insert<T: Send + 'static>(&self, value: T) -> Option<T> {
        let mut values = self.lock();
        values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast().ok())
            .map(|boxed| *boxed)
    }

    /// Returns a clone of the stored value of type `T`, if any.
    pub fn get<T: Clone + Send + 'static>(&self) -> Option<T> {
        let values = self.lock();
        values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Removes and returns the stored value of type `T`, if any.
    pub fn remove<T: Send + 'static>(&self) -> Option<T> {
        let mut values = self.lock();
        values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast().ok())
            .map(|boxed| *boxed)
    }

    /// Checks whether a value of type `T` is stored.
    pub fn contains<T: Send + 'static>(&self) -> bool {
        self.lock().contains_key(&TypeId::of::<T>())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TypeId, Box<dyn Any + Send>>> {
        // Poisoning is ignored; the map holds no invariants spanning multiple entries.
        self.values.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
