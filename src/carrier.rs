//! Per-request scratch space shared by filters.

use std::any::Any;
use std::fmt;

use indexmap::IndexMap;

type Slot = Box<dyn Any + Send + Sync>;

/// Ordered `key → value` map living for exactly one request.
///
/// A filter's before-phase stores what its after-phase needs; later filters
/// may read it too. Values are typed on the way out:
///
/// ```rust
/// use sluice::Carrier;
///
/// let mut carrier = Carrier::new();
/// carrier.insert("started", 42u64);
/// assert_eq!(carrier.get::<u64>("started"), Some(&42));
/// assert_eq!(carrier.get::<String>("started"), None);
/// ```
#[derive(Default)]
pub struct Carrier {
    slots: IndexMap<String, Slot>,
}

impl Carrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing (and keeping the position of)
    /// any previous value.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.slots.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.slots.get(key)?.downcast_ref()
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.slots.get_mut(key)?.downcast_mut()
    }

    /// Removes and returns the value if it has type `T`. A value of another
    /// type stays in place.
    pub fn take<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.slots.get(key)?.is::<T>() {
            return None;
        }
        let slot = self.slots.shift_remove(key)?;
        slot.downcast().ok().map(|boxed| *boxed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_and_typed() {
        let mut carrier = Carrier::new();
        carrier.insert("b", 1u8);
        carrier.insert("a", String::from("x"));
        carrier.insert("b", 2u8);
        assert_eq!(carrier.keys().collect::<Vec<_>>(), ["b", "a"]);
        assert_eq!(carrier.get::<u8>("b"), Some(&2));

        *carrier.get_mut::<String>("a").unwrap() += "y";
        assert_eq!(carrier.get::<String>("a").map(String::as_str), Some("xy"));
    }

    #[test]
    fn take_checks_type() {
        let mut carrier = Carrier::new();
        carrier.insert("flag", true);
        assert_eq!(carrier.take::<u32>("flag"), None);
        assert!(carrier.contains("flag"));
        assert_eq!(carrier.take::<bool>("flag"), Some(true));
        assert!(carrier.is_empty());
    }
}
