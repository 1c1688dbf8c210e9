use chrono::{DateTime, TimeDelta, Utc};

/// Time source for cache expiry; injected so expiry is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cached model listing with an explicit expiry instant.
///
/// Owned by the client instance; there is no process-wide cache, so two
/// clients never share (or fight over) a listing.
pub struct ModelCache {
    ttl: TimeDelta,
    entry: Option<(Vec<String>, DateTime<Utc>)>,
    clock: Box<dyn Clock>,
}

impl ModelCache {
    pub fn new(ttl: TimeDelta, clock: impl Clock + 'static) -> Self {
        Self {
            ttl,
            entry: None,
            clock: Box::new(clock),
        }
    }

    /// The cached listing, unless it has expired.
    pub fn get(&self) -> Option<Vec<String>> {
        match &self.entry {
            Some((models, expires_at)) if self.clock.now() < *expires_at => Some(models.clone()),
            _ => None,
        }
    }

    pub fn put(&mut self, models: Vec<String>) {
        self.entry = Some((models, self.clock.now() + self.ttl));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct TestClock(Arc<Mutex<DateTime<Utc>>>);

    impl TestClock {
        fn at(instant: DateTime<Utc>) -> Self {
            Self(Arc::new(Mutex::new(instant)))
        }

        fn advance(&self, delta: TimeDelta) {
            let mut now = self.0.lock().unwrap();
            *now += delta;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn entries_expire_at_their_instant() {
        let clock = TestClock::at("2024-01-01T00:00:00Z".parse().unwrap());
        let mut cache = ModelCache::new(TimeDelta::minutes(10), clock.clone());

        assert!(cache.get().is_none());
        cache.put(vec!["gpt-4o".to_string()]);
        assert_eq!(cache.get(), Some(vec!["gpt-4o".to_string()]));

        clock.advance(TimeDelta::minutes(9));
        assert!(cache.get().is_some());

        clock.advance(TimeDelta::minutes(2));
        assert!(cache.get().is_none());
    }

    #[test]
    fn put_refreshes_the_expiry() {
        let clock = TestClock::at("2024-01-01T00:00:00Z".parse().unwrap());
        let mut cache = ModelCache::new(TimeDelta::minutes(10), clock.clone());

        cache.put(vec!["a".to_string()]);
        clock.advance(TimeDelta::minutes(8));
        cache.put(vec!["b".to_string()]);
        clock.advance(TimeDelta::minutes(8));
        assert_eq!(cache.get(), Some(vec!["b".to_string()]));
    }
}
