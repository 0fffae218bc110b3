//! Lock-free (position x nucleotide) counter grid

use crate::nucleotide::ALPHABET_SIZE;
use std::sync::atomic::{AtomicI64, Ordering};

/// A (length x 4) grid of atomic counters.
///
/// Every update is a single atomic add, so any number of threads may write
/// concurrently without external synchronization. Reads of cells outside
/// the grid return zero, which is also what a cleared matrix reports.
#[derive(Debug, Default)]
pub struct CoverageMatrix {
    length: usize,
    cells: Box<[AtomicI64]>,
}

impl CoverageMatrix {
    pub fn new(length: usize) -> Self {
        let cells = (0..length * ALPHABET_SIZE)
            .map(|_| AtomicI64::new(0))
            .collect();
        Self { length, cells }
    }

    #[inline]
    fn index(&self, pos: usize, base: u8) -> usize {
        assert!(
            pos < self.length,
            "Position {} outside of coverage matrix of length {}",
            pos,
            self.length
        );
        pos * ALPHABET_SIZE + base as usize
    }

    /// Returns the value after the increment
    pub fn increment(&self, pos: usize, base: u8) -> i64 {
        self.increment_by(pos, base, 1)
    }

    /// Returns the value after the decrement
    pub fn decrement(&self, pos: usize, base: u8) -> i64 {
        self.increment_by(pos, base, -1)
    }

    pub fn increment_by(&self, pos: usize, base: u8, delta: i64) -> i64 {
        let idx = self.index(pos, base);
        self.cells[idx].fetch_add(delta, Ordering::Relaxed) + delta
    }

    pub fn get(&self, pos: usize, base: u8) -> i64 {
        if pos >= self.length {
            return 0;
        }
        self.cells[pos * ALPHABET_SIZE + base as usize].load(Ordering::Relaxed)
    }

    /// Sum over all four bases at a position
    pub fn total(&self, pos: usize) -> i64 {
        (0..ALPHABET_SIZE as u8).map(|base| self.get(pos, base)).sum()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_updates() {
        let matrix = CoverageMatrix::new(3);
        assert_eq!(matrix.increment(1, 2), 1);
        assert_eq!(matrix.increment_by(1, 2, 5), 6);
        assert_eq!(matrix.decrement(1, 2), 5);
        assert_eq!(matrix.decrement(0, 0), -1);
        assert_eq!(matrix.get(1, 2), 5);
        assert_eq!(matrix.total(1), 5);
        assert_eq!(matrix.get(7, 0), 0);
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_update_panics() {
        CoverageMatrix::new(2).increment(2, 0);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let threads = 8;
        let per_thread = 10_000;
        let matrix = Arc::new(CoverageMatrix::new(4));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let matrix = Arc::clone(&matrix);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        matrix.increment(2, 3);
                        // interleave some balancing traffic on a neighbouring cell
                        if (i + t) % 2 == 0 {
                            matrix.increment(2, 1);
                        } else {
                            matrix.decrement(2, 1);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(matrix.get(2, 3), (threads * per_thread) as i64);
        assert_eq!(matrix.get(2, 1), 0);
    }
}
