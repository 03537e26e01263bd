//! Delivery rate control for latest-event streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delivery rate for a latest-event subscription.
///
/// Event rates in acquisition systems are irregular, so throttling is
/// expressed as an upper bound rather than relative to a source frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UpdateRate {
    /// Every decoded event is offered as it arrives
    #[default]
    Native,

    /// At most this many events per second, latest wins
    Max(u32),
}

impl UpdateRate {
    /// Minimum spacing between delivered events, if throttled.
    ///
    /// `Max(0)` is treated as unthrottled.
    pub fn throttle_interval(self) -> Option<Duration> {
        match self {
            UpdateRate::Native | UpdateRate::Max(0) => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_and_zero_are_unthrottled() {
        assert_eq!(UpdateRate::Native.throttle_interval(), None);
        assert_eq!(UpdateRate::Max(0).throttle_interval(), None);
    }

    #[test]
    fn max_rate_gives_interval() {
        assert_eq!(UpdateRate::Max(10).throttle_interval(), Some(Duration::from_millis(100)));
    }
}
