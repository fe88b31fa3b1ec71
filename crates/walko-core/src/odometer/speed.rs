//! Running average speed over the last few seconds

use alloc::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    session_rotations: u32,
    at_ms: u32,
}

/// Ring of once-per-second session rotation snapshots
#[derive(Debug, Clone)]
pub struct SpeedWindow {
    samples: VecDeque<Sample>,
    len: usize,
}

impl SpeedWindow {
    pub fn new(window_secs: usize) -> Self {
        let len = window_secs.max(2);
        Self {
            samples: VecDeque::with_capacity(len),
            len,
        }
    }

    pub fn sample(&mut self, session_rotations: u32, now_ms: u32) {
        if self.samples.len() >= self.len {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            session_rotations,
            at_ms: now_ms,
        });
    }

    /// Drop all samples (a new session started)
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Rotation rate between the oldest and newest sample; 0 with fewer
    /// than two samples.
    pub fn rotations_per_second(&self) -> f32 {
        let (Some(oldest), Some(newest)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed_ms = newest.at_ms.wrapping_sub(oldest.at_ms);
        if elapsed_ms == 0 {
            return 0.0;
        }
        let rotations = newest
            .session_rotations
            .saturating_sub(oldest.session_rotations);
        rotations as f32 * 1000.0 / elapsed_ms as f32
    }
}

/// Average rotation rate over a whole session
pub fn session_rotations_per_second(rotations: u32, active_seconds: u32) -> f32 {
    if active_seconds == 0 {
        return 0.0;
    }
    rotations as f32 / active_seconds as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_two_samples() {
        let mut window = SpeedWindow::new(5);
        assert_eq!(window.rotations_per_second(), 0.0);
        window.sample(10, 1_000);
        assert_eq!(window.rotations_per_second(), 0.0);
        window.sample(13, 2_000);
        assert_eq!(window.rotations_per_second(), 3.0);
    }

    #[test]
    fn test_window_slides() {
        let mut window = SpeedWindow::new(5);
        // 2 rotations/s for 5 s, then 4 rotations/s
        let mut rotations = 0;
        for second in 0..5 {
            window.sample(rotations, second * 1_000);
            rotations += 2;
        }
        assert_eq!(window.rotations_per_second(), 2.0);

        for second in 5..10 {
            window.sample(rotations, second * 1_000);
            rotations += 4;
        }
        assert_eq!(window.rotations_per_second(), 4.0);

        window.reset();
        assert_eq!(window.rotations_per_second(), 0.0);
    }

    #[test]
    fn test_session_average() {
        assert_eq!(session_rotations_per_second(300, 0), 0.0);
        assert_eq!(session_rotations_per_second(300, 150), 2.0);
    }
}
