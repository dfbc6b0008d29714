//! Bounded sample of abnormal frames.

use vidscan_models::FrameResult;

/// Maximum number of sampled frames kept per job.
pub const SAMPLE_CAPACITY: usize = 20;

/// Append-only buffer of the first abnormal frames of a job.
///
/// Frames without abnormal detections are never kept. Once full, later
/// candidates are dropped; nothing is ever replaced.
#[derive(Debug, Clone)]
pub struct AbnormalFrameSampler {
    frames: Vec<FrameResult>,
    capacity: usize,
}

impl Default for AbnormalFrameSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl AbnormalFrameSampler {
    pub fn new() -> Self {
        Self::with_capacity(SAMPLE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Offer a frame; returns `true` when it was kept.
    pub fn consider(&mut self, result: FrameResult) -> bool {
        if result.abnormal_detections == 0 || self.is_full() {
            return false;
        }
        self.frames.push(result);
        true
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[FrameResult] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<FrameResult> {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidscan_models::FrameStats;

    fn result(frame_number: u64, abnormal: usize, total: usize) -> FrameResult {
        let stats = FrameStats {
            total_detections: total,
            abnormal_detections: abnormal,
            abnormality_percentage: vidscan_models::abnormality_percentage(abnormal, total),
        };
        FrameResult::new(frame_number, stats, "data:image/png;base64,AA==")
    }

    #[test]
    fn test_keeps_only_abnormal_frames() {
        let mut sampler = AbnormalFrameSampler::new();
        assert!(!sampler.consider(result(1, 0, 0)));
        assert!(!sampler.consider(result(2, 0, 3)));
        assert!(sampler.consider(result(3, 1, 2)));
        assert_eq!(sampler.len(), 1);
        assert_eq!(sampler.frames()[0].frame_number, 3);
    }

    #[test]
    fn test_first_twenty_win() {
        let mut sampler = AbnormalFrameSampler::new();
        for n in 1..=50 {
            sampler.consider(result(n, 1, 1));
        }

        assert_eq!(sampler.len(), SAMPLE_CAPACITY);
        assert!(sampler.is_full());
        let numbers: Vec<u64> = sampler.frames().iter().map(|f| f.frame_number).collect();
        assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_reset_empties() {
        let mut sampler = AbnormalFrameSampler::new();
        sampler.consider(result(4, 2, 2));
        sampler.reset();
        assert!(sampler.is_empty());
        assert!(sampler.consider(result(5, 1, 1)));
    }
}
