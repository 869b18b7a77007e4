// ABOUTME: Bounded port pool handing out local ports to tool servers.
// ABOUTME: Lowest-free-first linear scan, so assignment is deterministic.

use crate::error::{ConductorError, Result};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard};

/// Ports `base..base + count`, with the set currently leased.
#[derive(Debug)]
pub struct PortPool {
    base: u16,
    count: u16,
    leased: Mutex<BTreeSet<u16>>,
}

impl PortPool {
    /// Create a pool of `count` ports starting at `base`.
    pub fn new(base: u16, count: u16) -> Result<Self> {
        if count == 0 {
            return Err(ConductorError::Config(
                "port pool needs at least one port".into(),
            ));
        }
        if base == 0 || u32::from(base) + u32::from(count) - 1 > u32::from(u16::MAX) {
            return Err(ConductorError::Config(format!(
                "port pool {}+{} is outside 1..=65535",
                base, count
            )));
        }
        Ok(Self {
            base,
            count,
            leased: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn range(&self) -> RangeInclusive<u16> {
        // new() guarantees this does not overflow
        self.base..=self.base + (self.count - 1)
    }

    /// Lease the lowest port in range that is not currently leased.
    pub fn lease(&self) -> Result<u16> {
        let mut leased = self.lock();
        let port = self
            .range()
            .find(|port| !leased.contains(port))
            .ok_or(ConductorError::PoolExhausted {
                base: self.base,
                count: self.count,
            })?;
        leased.insert(port);
        tracing::debug!(port, leased = leased.len(), "Leased port");
        Ok(port)
    }

    /// Return a port to the pool. Returns false if it was not leased.
    pub fn release(&self, port: u16) -> bool {
        let mut leased = self.lock();
        let released = leased.remove(&port);
        if released {
            tracing::debug!(port, leased = leased.len(), "Released port");
        }
        released
    }

    pub fn is_leased(&self, port: u16) -> bool {
        self.lock().contains(&port)
    }

    /// Currently leased ports, ascending.
    pub fn leased(&self) -> Vec<u16> {
        self.lock().iter().copied().collect()
    }

    pub fn available(&self) -> usize {
        usize::from(self.count) - self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u16>> {
        // The set is always left consistent, so a poisoned lock is still usable.
        self.leased.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A leased port that goes back to the pool when dropped.
///
/// Holders that are cancelled mid-await still give the port back.
#[derive(Debug)]
pub struct PortLease {
    pool: Arc<PortPool>,
    port: u16,
}

impl PortLease {
    pub fn acquire(pool: &Arc<PortPool>) -> Result<Self> {
        let port = pool.lease()?;
        Ok(Self {
            pool: Arc::clone(pool),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.pool.release(self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_lowest_first() {
        let pool = PortPool::new(7400, 3).unwrap();
        assert_eq!(pool.lease().unwrap(), 7400);
        assert_eq!(pool.lease().unwrap(), 7401);
        assert_eq!(pool.lease().unwrap(), 7402);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_released_port_is_reused_first() {
        let pool = PortPool::new(7400, 3).unwrap();
        let a = pool.lease().unwrap();
        let b = pool.lease().unwrap();
        assert!(pool.release(a));
        assert_eq!(pool.lease().unwrap(), a);
        assert!(pool.is_leased(b));
    }

    #[test]
    fn test_exhausted_pool() {
        let pool = PortPool::new(9000, 1).unwrap();
        pool.lease().unwrap();
        let err = pool.lease().unwrap_err();
        assert!(matches!(
            err,
            ConductorError::PoolExhausted {
                base: 9000,
                count: 1
            }
        ));
    }

    #[test]
    fn test_release_is_idempotent() {
        let pool = PortPool::new(7400, 2).unwrap();
        let port = pool.lease().unwrap();
        assert!(pool.release(port));
        assert!(!pool.release(port));
        assert!(!pool.release(1234));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_range_at_top_of_port_space() {
        let pool = PortPool::new(65534, 2).unwrap();
        assert_eq!(pool.range(), 65534..=65535);
        assert_eq!(pool.lease().unwrap(), 65534);
        assert_eq!(pool.lease().unwrap(), 65535);
        assert!(pool.lease().is_err());
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(PortPool::new(7400, 0).is_err());
        assert!(PortPool::new(65535, 2).is_err());
        assert!(PortPool::new(0, 5).is_err());
    }

    #[test]
    fn test_interleaved_lease_release_stays_unique_and_in_range() {
        let pool = PortPool::new(8000, 5).unwrap();
        let mut held: Vec<u16> = Vec::new();
        // Deterministic pseudo-random walk over lease/release.
        let mut seed: u32 = 17;
        for _ in 0..200 {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            if seed % 3 == 0 && !held.is_empty() {
                let idx = (seed as usize / 3) % held.len();
                let port = held.swap_remove(idx);
                assert!(pool.release(port));
            } else {
                match pool.lease() {
                    Ok(port) => {
                        assert!(pool.range().contains(&port));
                        assert!(!held.contains(&port), "port {} leased twice", port);
                        held.push(port);
                    }
                    Err(ConductorError::PoolExhausted { .. }) => assert_eq!(held.len(), 5),
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
            let mut sorted = held.clone();
            sorted.sort_unstable();
            assert_eq!(pool.leased(), sorted);
        }
    }

    #[test]
    fn test_dropped_lease_returns_port() {
        let pool = Arc::new(PortPool::new(7400, 1).unwrap());
        let lease = PortLease::acquire(&pool).unwrap();
        assert_eq!(lease.port(), 7400);
        assert!(PortLease::acquire(&pool).is_err());

        drop(lease);
        assert!(!pool.is_leased(7400));
        assert_eq!(PortLease::acquire(&pool).unwrap().port(), 7400);
    }

    #[tokio::test]
    async fn test_lease_held_by_cancelled_future_is_returned() {
        let pool = Arc::new(PortPool::new(7400, 2).unwrap());
        let held = Arc::clone(&pool);
        let pending = async move {
            let _lease = PortLease::acquire(&held).unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        };

        let result = tokio::time::timeout(std::time::Duration::from_millis(20), pending).await;
        assert!(result.is_err());
        assert!(pool.leased().is_empty());
    }

    #[test]
    fn test_concurrent_leases_are_distinct() {
        let pool = Arc::new(PortPool::new(7400, 64).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    (0..8).map(|_| pool.lease().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u16> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 64);
        assert_eq!(pool.available(), 0);
    }
}
