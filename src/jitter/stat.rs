use std::collections::VecDeque;

/// Sliding-window statistics over arrival-interval deviations.
pub struct StatMeter {
    vals: VecDeque<f64>,
    size: usize,
}

impl StatMeter {
    pub fn new(size: usize) -> Self {
        Self {
            vals: VecDeque::with_capacity(size + 1),
            size,
        }
    }

    pub fn push(&mut self, val: f64) {
        self.vals.push_front(val);
        if self.vals.len() > self.size {
            self.vals.pop_back();
        }
    }

    pub fn clear(&mut self) {
        self.vals.clear();
    }

    pub fn fill(&self) -> usize {
        self.vals.len()
    }

    pub fn max(&self) -> f64 {
        self.vals.iter().fold(0.0, |m, &v| if v > m { v } else { m })
    }

    pub fn avg(&self) -> f64 {
        if self.vals.is_empty() {
            return 0.0;
        }
        self.vals.iter().sum::<f64>() / self.vals.len() as f64
    }

    pub fn stddev(&self) -> f64 {
        if self.vals.len() < 2 {
            return 0.0;
        }
        let mean = self.avg();
        let var = self
            .vals
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / self.vals.len() as f64;
        var.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_evicts_oldest() {
        let mut meter = StatMeter::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            meter.push(v);
        }
        assert_eq!(meter.fill(), 3);
        assert_eq!(meter.max(), 4.0);
        assert!((meter.avg() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn stddev_of_constant_window_is_zero() {
        let mut meter = StatMeter::new(10);
        for _ in 0..10 {
            meter.push(20.0);
        }
        assert_eq!(meter.stddev(), 0.0);
    }

    #[test]
    fn stddev_matches_hand_computation() {
        let mut meter = StatMeter::new(4);
        for v in [2.0, 4.0, 4.0, 6.0] {
            meter.push(v);
        }
        // mean 4, variance (4+0+0+4)/4 = 2
        assert!((meter.stddev() - 2.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn empty_meter_is_inert() {
        let meter = StatMeter::new(5);
        assert_eq!(meter.fill(), 0);
        assert_eq!(meter.max(), 0.0);
        assert_eq!(meter.avg(), 0.0);
        assert_eq!(meter.stddev(), 0.0);
    }
}
