//! Round-robin server pool.

use crate::backend::Backend;
use crate::config::BackendConfig;
use crate::proxy::ProxyError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Ordered set of backends with a shared rotation cursor.
///
/// Backends are added during start-up only; afterwards the set is read-only
/// and the only shared mutation is the lock-free cursor plus each backend's
/// own liveness flag.
#[derive(Debug, Default)]
pub struct ServerPool {
    backends: Vec<Arc<Backend>>,
    current: AtomicU64,
}

impl ServerPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool of reverse-proxied backends from configuration.
    pub fn from_config(
        backends: &[BackendConfig],
        connect_timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let mut pool = Self::new();
        for backend in backends {
            pool.add_backend(Backend::with_reverse_proxy(backend.url.clone(), connect_timeout)?);
        }
        Ok(pool)
    }

    /// Append a backend to the rotation.
    pub fn add_backend(&mut self, backend: Backend) {
        self.backends.push(Arc::new(backend));
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Raw cursor value (not reduced modulo the pool size).
    pub fn cursor(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Advance the cursor and return the new position within the pool.
    ///
    /// Returns 0 for an empty pool.
    pub fn next_index(&self) -> usize {
        let len = self.backends.len() as u64;
        let next = self.current.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if len == 0 {
            return 0;
        }
        (next % len) as usize
    }

    /// Select the next alive backend in rotation.
    ///
    /// Scans one full cycle starting at [`next_index`](Self::next_index). When
    /// the first alive backend is not the starting slot, the cursor is moved
    /// onto it so the next call resumes past the dead entries. That store can
    /// race with concurrent callers; losing it only affects fairness.
    pub fn get_next_peer(&self) -> Option<Arc<Backend>> {
        let len = self.backends.len();
        if len == 0 {
            return None;
        }

        let next = self.next_index();
        for i in next..next + len {
            let idx = i % len;
            let backend = &self.backends[idx];
            if backend.is_alive() {
                if i != next {
                    self.current.store(idx as u64, Ordering::Relaxed);
                }
                debug!(backend = %backend.url(), index = idx, "selected backend");
                return Some(Arc::clone(backend));
            }
        }

        None
    }

    /// Set the liveness of the backend configured with `url`.
    ///
    /// Returns `false` when no backend matches.
    pub fn mark_backend_status(&self, url: &Url, alive: bool) -> bool {
        match self.backends.iter().find(|b| b.url() == url) {
            Some(backend) => {
                backend.set_alive(alive);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    fn pool_of(n: usize) -> ServerPool {
        let configs: Vec<BackendConfig> = (0..n)
            .map(|i| BackendConfig {
                url: format!("http://127.0.0.1:{}", 9000 + i).parse().unwrap(),
            })
            .collect();
        ServerPool::from_config(&configs, Duration::from_secs(1)).unwrap()
    }

    fn port(backend: &Backend) -> u16 {
        backend.url().port().unwrap()
    }

    #[test]
    fn test_empty_pool() {
        let pool = ServerPool::new();
        assert!(pool.is_empty());
        assert_eq!(pool.next_index(), 0);
        assert!(pool.get_next_peer().is_none());
    }

    #[test]
    fn test_next_index_wraps() {
        let pool = pool_of(3);
        let indexes: Vec<usize> = (0..6).map(|_| pool.next_index()).collect();
        assert_eq!(indexes, vec![1, 2, 0, 1, 2, 0]);
        assert_eq!(pool.cursor(), 6);
    }

    #[test]
    fn test_next_index_survives_overflow() {
        let pool = pool_of(3);
        pool.current.store(u64::MAX, Ordering::Relaxed);
        assert_eq!(pool.next_index(), 0);
        assert_eq!(pool.next_index(), 1);
    }

    #[test]
    fn test_skips_dead_and_moves_cursor() {
        // [A alive, B dead, C alive], cursor at 0
        let pool = pool_of(3);
        pool.backends()[1].set_alive(false);

        let peer = pool.get_next_peer().unwrap();
        assert_eq!(port(&peer), 9002);
        assert_eq!(pool.cursor(), 2);

        // Resumes past C on the following call.
        let peer = pool.get_next_peer().unwrap();
        assert_eq!(port(&peer), 9000);
        assert_eq!(pool.cursor(), 3);
    }

    #[test]
    fn test_all_dead_returns_none() {
        let pool = pool_of(2);
        for backend in pool.backends() {
            backend.set_alive(false);
        }

        for start in [0, 1, 7, u64::MAX] {
            pool.current.store(start, Ordering::Relaxed);
            assert!(pool.get_next_peer().is_none());
        }
    }

    #[test]
    fn test_round_robin_visits_each_once_per_cycle() {
        let pool = pool_of(4);

        let picks: Vec<u16> = (0..12).map(|_| port(&pool.get_next_peer().unwrap())).collect();
        assert_eq!(
            picks,
            vec![9001, 9002, 9003, 9000, 9001, 9002, 9003, 9000, 9001, 9002, 9003, 9000]
        );

        for cycle in picks.chunks(4) {
            let distinct: HashSet<u16> = cycle.iter().copied().collect();
            assert_eq!(distinct.len(), 4);
        }
    }

    #[test]
    fn test_only_alive_backend_always_chosen() {
        let pool = pool_of(5);
        for (i, backend) in pool.backends().iter().enumerate() {
            backend.set_alive(i == 3);
        }

        for _ in 0..20 {
            assert_eq!(port(&pool.get_next_peer().unwrap()), 9003);
        }
    }

    #[test]
    fn test_mark_backend_status() {
        let pool = pool_of(2);
        let url: Url = "http://127.0.0.1:9001".parse().unwrap();

        assert!(pool.mark_backend_status(&url, false));
        assert!(!pool.backends()[1].is_alive());
        assert!(pool.backends()[0].is_alive());

        assert!(pool.mark_backend_status(&url, true));
        assert!(pool.backends()[1].is_alive());

        let unknown: Url = "http://127.0.0.1:1".parse().unwrap();
        assert!(!pool.mark_backend_status(&unknown, false));
    }

    #[test]
    fn test_concurrent_selection_returns_alive() {
        let pool = Arc::new(pool_of(4));
        pool.backends()[0].set_alive(false);
        pool.backends()[2].set_alive(false);

        let selectors: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let peer = pool.get_next_peer().unwrap();
                        assert!(matches!(port(&peer), 9001 | 9003));
                    }
                })
            })
            .collect();

        for handle in selectors {
            handle.join().unwrap();
        }
    }
}
