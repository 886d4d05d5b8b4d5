use std::num::NonZeroUsize;

/// 固定容量的环形缓冲区，维护运行和以 O(1) 求均值。
///
/// 本身不加锁：调用方（`TagStats`）在库存锁内访问。
/// 无样本时 `mean()` 返回 `f64::NAN`，与任何阈值比较均为 false。
#[derive(Clone, Debug)]
pub struct MovingAverage {
    values: Vec<f64>,
    capacity: usize,
    next: usize,
    sum: f64,
}

impl MovingAverage {
    /// 创建容量为 `capacity` 的窗口；容量为 0 时返回 None。
    pub fn new(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(Self::with_window)
    }

    pub fn with_window(window: NonZeroUsize) -> Self {
        let capacity = window.get();
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            sum: 0.0,
        }
    }

    pub fn add_value(&mut self, value: f64) {
        if self.values.len() < self.capacity {
            self.values.push(value);
        } else {
            // 已满：覆盖最旧的槽位
            self.sum -= self.values[self.next];
            self.values[self.next] = value;
        }
        self.sum += value;
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.sum / self.values.len() as f64
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.next = 0;
        self.sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(MovingAverage::new(0).is_none());
    }

    #[test]
    fn empty_mean_is_nan() {
        let avg = MovingAverage::new(3).unwrap();
        assert!(avg.mean().is_nan());
        assert_eq!(avg.len(), 0);
    }

    #[test]
    fn overwrites_oldest_once_full() {
        let mut avg = MovingAverage::new(3).unwrap();
        for v in [1.0, 2.0, 3.0] {
            avg.add_value(v);
        }
        assert_eq!(avg.mean(), 2.0);
        avg.add_value(10.0);
        // 窗口变为 [10, 2, 3]
        assert_eq!(avg.len(), 3);
        assert_eq!(avg.mean(), 5.0);
        avg.add_value(10.0);
        avg.add_value(10.0);
        assert_eq!(avg.mean(), 10.0);
    }

    #[test]
    fn clear_resets_window() {
        let mut avg = MovingAverage::new(2).unwrap();
        avg.add_value(-70.0);
        avg.clear();
        assert!(avg.is_empty());
        avg.add_value(-60.0);
        assert_eq!(avg.mean(), -60.0);
    }
}
