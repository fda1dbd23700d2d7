//! Gray-value histogram statistics.
//!
//! The exhaustive matcher derives its binarization threshold from the
//! intensity distribution inside the candidate quad; the histogram keeps
//! enough to answer min/max/mean and an Otsu split.

#[derive(Clone)]
pub struct GrayHistogram {
    bins: [u32; 256],
    count: u32,
}

impl Default for GrayHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl GrayHistogram {
    pub fn new() -> Self {
        Self {
            bins: [0; 256],
            count: 0,
        }
    }

    pub fn from_samples(samples: &[u8]) -> Self {
        let mut h = Self::new();
        for &v in samples {
            h.add(v);
        }
        h
    }

    #[inline]
    pub fn add(&mut self, v: u8) {
        self.bins[v as usize] += 1;
        self.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn min(&self) -> Option<u8> {
        self.bins.iter().position(|&b| b > 0).map(|i| i as u8)
    }

    pub fn max(&self) -> Option<u8> {
        self.bins.iter().rposition(|&b| b > 0).map(|i| i as u8)
    }

    pub fn mean(&self) -> Option<f32> {
        if self.count == 0 {
            return None;
        }
        let sum: u64 = self
            .bins
            .iter()
            .enumerate()
            .map(|(i, &b)| i as u64 * b as u64)
            .sum();
        Some(sum as f32 / self.count as f32)
    }

    /// Otsu's between-class-variance maximizing threshold.
    ///
    /// Falls back to the midpoint when fewer than three distinct gray levels
    /// are present, and to 127 for an empty histogram.
    pub fn otsu_threshold(&self) -> u8 {
        if self.count == 0 {
            return 127;
        }
        let (min_v, max_v) = match (self.min(), self.max()) {
            (Some(a), Some(b)) => (a, b),
            _ => return 127,
        };
        if min_v == max_v {
            return min_v;
        }
        let nonzero_bins = self.bins.iter().filter(|&&b| b > 0).count();
        if nonzero_bins <= 2 {
            return ((min_v as u16 + max_v as u16) / 2) as u8;
        }

        let total = self.count as f64;
        let mut sum_total = 0f64;
        for (i, &b) in self.bins.iter().enumerate() {
            sum_total += i as f64 * b as f64;
        }

        let mut sum_b = 0f64;
        let mut w_b = 0f64;
        let mut best_var = -1f64;
        let mut best_t = 127u8;

        for (t, &b) in self.bins.iter().enumerate() {
            w_b += b as f64;
            if w_b < 1.0 {
                continue;
            }
            let w_f = total - w_b;
            if w_f < 1.0 {
                break;
            }

            sum_b += t as f64 * b as f64;
            let m_b = sum_b / w_b;
            let m_f = (sum_total - sum_b) / w_f;

            let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
            if var_between > best_var {
                best_var = var_between;
                best_t = t as u8;
            }
        }

        best_t
    }
}

/// Otsu threshold straight from a slice of samples.
pub fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    GrayHistogram::from_samples(samples).otsu_threshold()
}
