//! # In-Flight Marker
//!
//! Tracks which resource keys have an attempt running. A trigger arriving for
//! a busy key is coalesced into a single pending re-check which the running
//! attempt picks up when it finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-key in-flight registry, shared by all workers
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    // key -> re-check requested while in flight
    inner: Arc<Mutex<HashMap<String, bool>>>,
}

/// Result of [`InFlight::try_begin`]
#[derive(Debug)]
pub enum Admission {
    /// The caller owns the key until the guard is finished or dropped
    Acquired(InFlightGuard),
    /// Another attempt owns the key; a re-check has been recorded
    Coalesced,
}

impl InFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_begin(&self, key: &str) -> Admission {
        let mut keys = self.lock();
        if let Some(pending) = keys.get_mut(key) {
            *pending = true;
            return Admission::Coalesced;
        }
        keys.insert(key.to_string(), false);
        Admission::Acquired(InFlightGuard {
            key: Some(key.to_string()),
            owner: self.clone(),
        })
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }
}

/// Ownership of one key
#[derive(Debug)]
pub struct InFlightGuard {
    key: Option<String>,
    owner: InFlight,
}

impl InFlightGuard {
    /// Release the key, returning whether a re-check was requested meanwhile
    #[must_use]
    pub fn finish(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        match self.key.take() {
            Some(key) => self.owner.lock().remove(&key).unwrap_or(false),
            None => false,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_trigger_is_coalesced() {
        let in_flight = InFlight::new();
        let Admission::Acquired(guard) = in_flight.try_begin("default/demo") else {
            panic!("first attempt should acquire");
        };
        assert!(matches!(
            in_flight.try_begin("default/demo"),
            Admission::Coalesced
        ));
        assert!(matches!(
            in_flight.try_begin("default/demo"),
            Admission::Coalesced
        ));
        // Several triggers collapse into one pending re-check
        assert!(guard.finish());
        assert!(!in_flight.is_in_flight("default/demo"));
    }

    #[test]
    fn test_keys_are_independent() {
        let in_flight = InFlight::new();
        let Admission::Acquired(a) = in_flight.try_begin("default/a") else {
            panic!("a should acquire");
        };
        let Admission::Acquired(b) = in_flight.try_begin("default/b") else {
            panic!("b should acquire");
        };
        assert!(!a.finish());
        assert!(!b.finish());
    }

    #[test]
    fn test_dropped_guard_releases_key() {
        let in_flight = InFlight::new();
        {
            let _guard = in_flight.try_begin("default/demo");
            assert!(in_flight.is_in_flight("default/demo"));
        }
        assert!(!in_flight.is_in_flight("default/demo"));
        assert!(matches!(
            in_flight.try_begin("default/demo"),
            Admission::Acquired(_)
        ));
    }
}
