use parking_lot::Mutex;

/// Default client media port range.
pub const MEDIA_PORT_FIRST: u16 = 30000;
pub const MEDIA_PORT_LAST: u16 = 40000;

/// Process-wide allocator for media UDP ports. Sessions take a port per
/// stream direction and give it back on stop; even ports only, keeping the
/// odd ones free for a future RTCP pairing.
pub struct PortPool {
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    first: u16,
    last: u16,
    next: u16,
    reclaimed: Vec<u16>,
}

impl PortPool {
    pub fn new() -> Self {
        Self::with_range(MEDIA_PORT_FIRST, MEDIA_PORT_LAST)
    }

    pub fn with_range(first: u16, last: u16) -> Self {
        let first = first + (first & 1);
        Self {
            inner: Mutex::new(PoolInner {
                first,
                last,
                next: first,
                reclaimed: Vec::new(),
            }),
        }
    }

    /// Next free port, preferring reclaimed ones. `None` when the range is
    /// exhausted.
    pub fn take(&self) -> Option<u16> {
        let mut inner = self.inner.lock();

        if let Some(port) = inner.reclaimed.pop() {
            return Some(port);
        }

        if inner.next > inner.last {
            tracing::error!(
                "media port range {}..{} exhausted",
                inner.first,
                inner.last
            );
            return None;
        }

        let port = inner.next;
        inner.next += 2;
        Some(port)
    }

    pub fn give_back(&self, port: u16) {
        let mut inner = self.inner.lock();
        if port >= inner.first && port <= inner.last && !inner.reclaimed.contains(&port) {
            inner.reclaimed.push(port);
        }
    }
}

impl Default for PortPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_even_ports() {
        let pool = PortPool::with_range(30001, 30010);
        assert_eq!(pool.take(), Some(30002));
        assert_eq!(pool.take(), Some(30004));
    }

    #[test]
    fn reclaims_returned_ports_first() {
        let pool = PortPool::with_range(30000, 30006);
        let a = pool.take().unwrap();
        let _b = pool.take().unwrap();

        pool.give_back(a);
        assert_eq!(pool.take(), Some(a));
    }

    #[test]
    fn exhausts_cleanly() {
        let pool = PortPool::with_range(30000, 30002);
        assert!(pool.take().is_some());
        assert!(pool.take().is_some());
        assert_eq!(pool.take(), None);
    }
}
