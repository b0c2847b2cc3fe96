//! Low-discrepancy jitter for the screen cone trace.
//!
//! Radix-2/3 Halton pairs, cycled per frame so the temporal filter sees a
//! deterministic, restartable sequence of sub-frame offsets.

/// Radix-inverse Halton value for `index`.
pub fn halton(mut index: u32, radix: u32) -> f32 {
    let mut result = 0.0f32;
    let mut fraction = 1.0f32 / radix as f32;
    while index > 0 {
        result += (index % radix) as f32 * fraction;
        index /= radix;
        fraction /= radix as f32;
    }
    result
}

/// Cycling (halton2, halton3) offset generator.
///
/// The index advances by one each frame and wraps at `count - 1`, matching
/// the original sequence length convention.
#[derive(Debug, Clone)]
pub struct JitterSequence {
    index: u32,
    count: u32,
}

impl JitterSequence {
    pub fn new(halton_count: u32) -> Self {
        Self {
            index: 0,
            count: halton_count.max(2),
        }
    }

    /// Offset for the current frame; advances the sequence.
    pub fn next_offset(&mut self) -> [f32; 2] {
        let offset = [halton(self.index, 2), halton(self.index, 3)];
        self.index += 1;
        if self.index >= self.count - 1 {
            self.index = 0;
        }
        offset
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halton_literals() {
        assert_eq!(halton(0, 2), 0.0);
        assert!((halton(1, 2) - 0.5).abs() < 1e-6);
        assert!((halton(2, 2) - 0.25).abs() < 1e-6);
        assert!((halton(3, 2) - 0.75).abs() < 1e-6);
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-6);
        assert!((halton(2, 3) - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn sequence_wraps_after_count_minus_one() {
        let mut seq = JitterSequence::new(8);
        for _ in 0..7 {
            seq.next_offset();
        }
        assert_eq!(seq.index(), 0);
        let first = seq.next_offset();
        assert_eq!(first, [0.0, 0.0]);
    }

    #[test]
    fn sequence_is_deterministic() {
        let mut a = JitterSequence::new(8);
        let mut b = JitterSequence::new(8);
        for _ in 0..20 {
            assert_eq!(a.next_offset(), b.next_offset());
        }
    }
}
