//! Outbound Send Throttle
//!
//! The exchange enforces a ceiling on control messages (subscribe,
//! unsubscribe, ping) per rolling second and disconnects clients that
//! exceed it. The throttle paces sends to the ceiling minus a safety
//! margin, never to the documented limit itself.

use std::time::Duration;

use tokio::time::Instant;

/// Paces outbound control sends for one connection.
///
/// Call [`SendThrottle::acquire`] immediately before each send: the first
/// send passes through, subsequent sends are spaced at least one pacing
/// interval apart.
#[derive(Debug)]
pub struct SendThrottle {
    interval: Duration,
    last_send: Option<Instant>,
}

impl SendThrottle {
    /// Create a throttle from the documented cap and the safety margin.
    ///
    /// The effective rate is `cap - margin`, floored at one send per
    /// second so a misconfigured margin can never stall the queue forever.
    #[must_use]
    pub fn new(cap_per_sec: u32, safety_margin: u32) -> Self {
        let effective = cap_per_sec.saturating_sub(safety_margin).max(1);
        Self {
            interval: Duration::from_secs(1) / effective,
            last_send: None,
        }
    }

    /// The pacing interval between consecutive sends.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next send is allowed, then claim the slot.
    pub async fn acquire(&mut self) {
        if let Some(last) = self.last_send {
            tokio::time::sleep_until(last + self.interval).await;
        }
        self.last_send = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_reflects_margin() {
        let throttle = SendThrottle::new(5, 1);
        assert_eq!(throttle.interval(), Duration::from_millis(250));

        let throttle = SendThrottle::new(10, 0);
        assert_eq!(throttle.interval(), Duration::from_millis(100));
    }

    #[test]
    fn margin_can_never_stall_the_queue() {
        let throttle = SendThrottle::new(2, 10);
        assert_eq!(throttle.interval(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn first_send_is_immediate() {
        let mut throttle = SendThrottle::new(5, 1);
        let start = Instant::now();
        throttle.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_spaced_by_interval() {
        let mut throttle = SendThrottle::new(5, 1);
        let start = Instant::now();

        for _ in 0..5 {
            throttle.acquire().await;
        }

        // Five sends: the first immediate, four spaced 250ms apart.
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn no_rolling_second_exceeds_effective_rate() {
        let mut throttle = SendThrottle::new(5, 1);
        let start = Instant::now();
        let mut send_times = Vec::new();

        for _ in 0..10 {
            throttle.acquire().await;
            send_times.push(start.elapsed());
        }

        // Count sends inside every [t, t+1s) window anchored at a send.
        for (i, anchor) in send_times.iter().enumerate() {
            let window_end = *anchor + Duration::from_secs(1);
            let in_window = send_times[i..]
                .iter()
                .filter(|t| **t < window_end)
                .count();
            assert!(in_window <= 4, "window starting at {anchor:?} held {in_window} sends");
        }
    }
}
