// src/stream/producer.rs - Frame rate gate
//
// Non-keyframes closer together than 1 / send_frame_rate never reach the queue.

use log::debug;
use std::time::{Duration, Instant};

/// Rate gate in front of the frame queue.
///
/// Non-keyframes arriving sooner than `send_delay` after the last accepted
/// frame are dropped before they are ever queued. Keyframes always pass.
#[derive(Debug, Clone)]
pub struct FrameProducer {
    send_delay: Duration,
    last_send_time: Option<Instant>,
    accepted: u64,
    rate_limited: u64,
}

impl FrameProducer {
    pub fn new(send_delay: Duration) -> Self {
        Self {
            send_delay,
            last_send_time: None,
            accepted: 0,
            rate_limited: 0,
        }
    }

    /// Gate for frames sampled at `frames_per_second`.
    pub fn with_frame_rate(frames_per_second: f32) -> Self {
        let send_delay = if frames_per_second.is_finite() && frames_per_second > 0.0 {
            Duration::from_secs_f32(1.0 / frames_per_second)
        } else {
            Duration::ZERO
        };
        Self::new(send_delay)
    }

    pub fn set_send_delay(&mut self, send_delay: Duration) {
        self.send_delay = send_delay;
    }

    pub fn send_delay(&self) -> Duration {
        self.send_delay
    }

    /// Decide whether a frame observed at `now` goes into the queue.
    ///
    /// The last-send time only moves when a frame is accepted.
    pub fn should_accept(&mut self, is_key_frame: bool, now: Instant) -> bool {
        let too_soon = self
            .last_send_time
            .map(|last| now.saturating_duration_since(last) < self.send_delay)
            .unwrap_or(false);

        if too_soon && !is_key_frame {
            self.rate_limited += 1;
            return false;
        }

        if is_key_frame {
            debug!("Keyframe");
        }
        self.last_send_time = Some(now);
        self.accepted += 1;
        true
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_accepted() {
        let mut producer = FrameProducer::with_frame_rate(1.0);
        assert!(producer.should_accept(false, Instant::now()));
    }

    #[test]
    fn test_non_keyframes_rate_limited() {
        let mut producer = FrameProducer::with_frame_rate(1.0);
        let start = Instant::now();

        assert!(producer.should_accept(false, start));
        assert!(!producer.should_accept(false, start + Duration::from_millis(10)));
        assert_eq!(producer.accepted(), 1);
        assert_eq!(producer.rate_limited(), 1);
    }

    #[test]
    fn test_keyframes_bypass_rate_limit() {
        let mut producer = FrameProducer::with_frame_rate(1.0);
        let start = Instant::now();

        assert!(producer.should_accept(true, start));
        assert!(producer.should_accept(true, start + Duration::from_millis(10)));
        assert_eq!(producer.accepted(), 2);
    }

    #[test]
    fn test_last_send_time_moves_only_on_accept() {
        let mut producer = FrameProducer::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(producer.should_accept(false, start));
        // Rejected calls must not push the window forward.
        assert!(!producer.should_accept(false, start + Duration::from_millis(60)));
        assert!(!producer.should_accept(false, start + Duration::from_millis(90)));
        assert!(producer.should_accept(false, start + Duration::from_millis(100)));
    }

    #[test]
    fn test_keyframe_restarts_window() {
        let mut producer = FrameProducer::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(producer.should_accept(false, start));
        assert!(producer.should_accept(true, start + Duration::from_millis(50)));
        assert!(!producer.should_accept(false, start + Duration::from_millis(120)));
        assert!(producer.should_accept(false, start + Duration::from_millis(150)));
    }
}
