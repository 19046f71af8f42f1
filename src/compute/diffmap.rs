//! Per-pixel distance cache with an exact running total.
//!
//! Cells store distances as fixed-point integers so that the running total
//! never drifts from the sum of the cells, no matter how many partial
//! updates an organism's lineage accumulates.

use std::sync::Mutex;

/// Fixed-point scale of a cell.
pub const DIFF_GRANULARITY: f64 = 10_000.0;

/// Cached per-pixel distances for one rendered organism.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffMap {
    width: u32,
    height: u32,
    cells: Vec<i64>,
    total: i64,
}

impl DiffMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![0; width as usize * height as usize],
            total: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Overwrite the distance of one pixel.
    #[inline]
    pub fn set(&mut self, x: u32, y: u32, diff: f32) {
        let idx = self.index(x, y);
        let value = (diff as f64 * DIFF_GRANULARITY).round() as i64;
        self.total += value - self.cells[idx];
        self.cells[idx] = value;
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        (self.cells[self.index(x, y)] as f64 / DIFF_GRANULARITY) as f32
    }

    /// Mean distance over all pixels. O(1).
    pub fn average(&self) -> f32 {
        if self.cells.is_empty() {
            return 0.0;
        }
        (self.total as f64 / DIFF_GRANULARITY / self.cells.len() as f64) as f32
    }

    /// Zero every cell.
    pub fn clear(&mut self) {
        self.cells.fill(0);
        self.total = 0;
    }

    /// Become a copy of `other`, reusing this map's buffer.
    pub fn copy_from(&mut self, other: &DiffMap) {
        self.width = other.width;
        self.height = other.height;
        self.cells.clear();
        self.cells.extend_from_slice(&other.cells);
        self.total = other.total;
    }

    fn is_clear(&self) -> bool {
        self.total == 0 && self.cells.iter().all(|&c| c == 0)
    }
}

/// Freelist of diff map buffers shared by the evaluators.
///
/// Released maps are cleared before they are handed out again.
#[derive(Debug)]
pub struct DiffMapPool {
    width: u32,
    height: u32,
    free: Mutex<Vec<DiffMap>>,
    capacity: usize,
}

impl DiffMapPool {
    pub fn new(width: u32, height: u32, capacity: usize) -> Self {
        Self {
            width,
            height,
            free: Mutex::new(Vec::new()),
            capacity,
        }
    }

    fn take(&self) -> Option<DiffMap> {
        self.free.lock().ok().and_then(|mut free| free.pop())
    }

    /// A zeroed map sized for the canvas.
    pub fn acquire_blank(&self) -> DiffMap {
        self.take()
            .unwrap_or_else(|| DiffMap::new(self.width, self.height))
    }

    /// A copy of `parent`.
    pub fn acquire_copy(&self, parent: &DiffMap) -> DiffMap {
        match self.take() {
            Some(mut map) => {
                map.copy_from(parent);
                map
            }
            None => parent.clone(),
        }
    }

    /// Return a map to the freelist. Maps of the wrong size are dropped.
    pub fn release(&self, mut map: DiffMap) {
        if map.width != self.width || map.height != self.height {
            return;
        }
        map.clear();
        if let Ok(mut free) = self.free.lock()
            && free.len() < self.capacity
        {
            debug_assert!(map.is_clear());
            free.push(map);
        }
    }

    /// Buffers currently waiting for reuse.
    pub fn available(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_set_overwrites_total() {
        let mut map = DiffMap::new(2, 2);
        map.set(0, 0, 0.5);
        map.set(1, 1, 0.25);
        map.set(0, 0, 0.125);
        assert!((map.average() - (0.125 + 0.25) / 4.0).abs() < 1e-6);
        assert!((map.get(1, 1) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_released_map_is_cleared() {
        let pool = DiffMapPool::new(3, 3, 4);
        let mut map = pool.acquire_blank();
        map.set(2, 2, 0.9);
        pool.release(map);
        assert_eq!(pool.available(), 1);
        let reused = pool.acquire_blank();
        assert_eq!(reused.average(), 0.0);
        assert_eq!(reused.get(2, 2), 0.0);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_acquire_copy_matches_parent() {
        let pool = DiffMapPool::new(2, 1, 4);
        let mut parent = DiffMap::new(2, 1);
        parent.set(1, 0, 0.75);
        pool.release(DiffMap::new(2, 1));
        let copy = pool.acquire_copy(&parent);
        assert_eq!(copy, parent);
    }

    proptest! {
        #[test]
        fn test_average_matches_cell_sum(
            updates in prop::collection::vec((0u32..8, 0u32..8, 0.0f32..2.0), 0..200)
        ) {
            let mut map = DiffMap::new(8, 8);
            for (x, y, diff) in updates {
                map.set(x, y, diff);
            }
            let mut sum = 0.0f64;
            for y in 0..8 {
                for x in 0..8 {
                    sum += map.get(x, y) as f64;
                }
            }
            prop_assert!((map.average() as f64 - sum / 64.0).abs() < 1e-5);
        }
    }
}
