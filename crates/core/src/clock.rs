use chrono::Utc;

/// Millisecond timestamp source that never repeats and never goes backwards
/// within one session.
///
/// Increment timestamps are the identity key when device logs merge, so a
/// device must not mint the same value twice even when two flushes land in
/// the same millisecond or the system clock steps back between them.  Seed
/// the floor from the loaded log with [`observe`](Self::observe) so a restart
/// cannot reissue a timestamp that is already on disk.
#[derive(Debug, Default)]
pub struct IncrementClock {
    last: i64,
}

impl IncrementClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the floor to `timestamp` if it is ahead of everything seen so
    /// far.
    pub fn observe(&mut self, timestamp: i64) {
        if timestamp > self.last {
            self.last = timestamp;
        }
    }

    /// Mint the next timestamp: wall-clock now, bumped past the floor when
    /// now would repeat or precede it.
    pub fn next(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::IncrementClock;

    #[test]
    fn timestamps_are_strictly_increasing() {
        let mut clock = IncrementClock::new();
        let mut last = 0;
        for _ in 0..1_000 {
            let ts = clock.next();
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn observe_raises_the_floor() {
        let mut clock = IncrementClock::new();
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        clock.observe(future);
        assert_eq!(clock.next(), future + 1);
    }

    #[test]
    fn observe_ignores_older_timestamps() {
        let mut clock = IncrementClock::new();
        let first = clock.next();
        clock.observe(first - 10_000);
        assert!(clock.next() > first);
    }
}
