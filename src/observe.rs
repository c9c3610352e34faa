//! Typed property observation
//!
//! Replaces ad hoc key/value observation with explicit per-field
//! registration. Observers are invoked synchronously, immediately after the
//! owning field mutates, so downstream state is deterministic in tests.

/// Handle returned from [`Observable::observe`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// A value with synchronous change observers.
pub struct Observable<T> {
    value: T,
    observers: Vec<(ObserverId, Box<dyn FnMut(&T)>)>,
    next_id: u64,
}

impl<T: PartialEq> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            observers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Store `value` and notify observers if it differs from the current
    /// value. Returns whether a change occurred.
    pub fn set(&mut self, value: T) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        for (_, observer) in self.observers.iter_mut() {
            observer(&self.value);
        }
        true
    }

    pub fn observe(&mut self, observer: impl FnMut(&T) + 'static) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Remove a previously registered observer. Returns whether it existed.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

impl<T: PartialEq + Copy> Observable<T> {
    pub fn value(&self) -> T {
        self.value
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.value)
            .field("observers", &self.observers.len())
            .finish()
    }
}
