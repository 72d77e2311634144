use std::time::{Duration, Instant};

/// A one-shot expiry deadline for a cached token
///
/// The timer does not run anything in the background. It is armed with a
/// deadline and fires, from the point of view of anyone asking, once the
/// deadline has passed. Each cached token carries its own timer, so replacing
/// the token replaces the timer with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshTimer {
    deadline: Option<Instant>,
}

impl RefreshTimer {
    /// Arms a timer that fires `timeout` after `now`
    ///
    /// A timeout too large to represent never fires.
    pub fn start(now: Instant, timeout: Duration) -> Self {
        Self {
            deadline: now.checked_add(timeout),
        }
    }

    /// Whether the timer has fired as of `now`
    #[inline]
    pub fn has_fired_at(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// Time left before the timer fires, as of `now`
    #[inline]
    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_deadline_passes() {
        let now = Instant::now();
        let timer = RefreshTimer::start(now, Duration::from_secs(10));

        assert!(!timer.has_fired_at(now));
        assert!(!timer.has_fired_at(now + Duration::from_secs(9)));
        assert!(timer.has_fired_at(now + Duration::from_secs(10)));
        assert_eq!(
            timer.remaining_at(now + Duration::from_secs(4)),
            Some(Duration::from_secs(6))
        );
    }

    #[test]
    fn unrepresentable_deadline_never_fires() {
        let now = Instant::now();
        let timer = RefreshTimer::start(now, Duration::MAX);

        assert!(!timer.has_fired_at(now + Duration::from_secs(3600)));
        assert_eq!(timer.remaining_at(now), None);
    }
}
