use crate::error::TransferError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Caps the number of concurrently active outbound transfer sessions. Shared by
///  cloning; attempts beyond the cap fail immediately with a capacity error and
///  do not spawn a session.
#[derive(Clone)]
pub struct SessionLimiter {
    cap: usize,
    active: Arc<AtomicUsize>,
}

impl SessionLimiter {
    pub fn new(cap: usize) -> SessionLimiter {
        SessionLimiter {
            cap,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn try_acquire(&self) -> Result<SessionPermit, TransferError> {
        let result = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                if count < self.cap {
                    Some(count + 1)
                }
                else {
                    None
                }
            });

        match result {
            Ok(previous) => {
                debug!("backup session started ({} of {} active)", previous + 1, self.cap);
                Ok(SessionPermit {
                    active: self.active.clone(),
                })
            }
            Err(_) => Err(TransferError::Capacity(self.cap)),
        }
    }
}

/// Held for the lifetime of an outbound session; releases its limiter slot on
///  drop, i.e. when the session's event loop exits.
pub struct SessionPermit {
    active: Arc<AtomicUsize>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Marks whether the server currently has an active inbound connection. At most
///  one is served at a time; further connection attempts are refused while the
///  claim is held.
#[derive(Clone, Default)]
pub struct ConnectionSlot {
    occupied: Arc<AtomicBool>,
}

impl ConnectionSlot {
    pub fn new() -> ConnectionSlot {
        ConnectionSlot::default()
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::SeqCst)
    }

    pub fn try_claim(&self) -> Option<ConnectionClaim> {
        if self.occupied.swap(true, Ordering::SeqCst) {
            None
        }
        else {
            Some(ConnectionClaim {
                occupied: self.occupied.clone(),
            })
        }
    }
}

/// Cleared on drop, i.e. on connection teardown.
pub struct ConnectionClaim {
    occupied: Arc<AtomicBool>,
}

impl Drop for ConnectionClaim {
    fn drop(&mut self) {
        self.occupied.store(false, Ordering::SeqCst);
    }
}

/// Per-connection sent/received message counters, used for the optional
///  diagnostic disconnection during fault-injection testing.
#[derive(Default, Debug)]
pub struct SessionCounters {
    sent: u64,
    received: u64,
}

impl SessionCounters {
    pub fn on_sent(&mut self) {
        self.sent += 1;
    }

    pub fn on_received(&mut self) {
        self.received += 1;
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// true once the sent or received count reached the configured threshold
    pub fn limit_reached(&self, disconnect_after: Option<u64>) -> bool {
        match disconnect_after {
            Some(threshold) => self.sent >= threshold || self.received >= threshold,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::cap_one(1)]
    #[case::cap_three(3)]
    fn test_limiter_rejects_beyond_cap(#[case] cap: usize) {
        let limiter = SessionLimiter::new(cap);

        let permits: Vec<_> = (0..cap).map(|_| limiter.try_acquire().unwrap()).collect();
        assert_eq!(limiter.active_count(), cap);

        match limiter.try_acquire() {
            Err(TransferError::Capacity(reported)) => assert_eq!(reported, cap),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected capacity error"),
        }

        // dropping a permit frees a slot
        drop(permits);
        assert_eq!(limiter.active_count(), 0);
        let _permit = limiter.try_acquire().unwrap();
    }

    #[rstest]
    fn test_connection_slot_single_claim() {
        let slot = ConnectionSlot::new();
        assert!(!slot.is_occupied());

        let claim = slot.try_claim().unwrap();
        assert!(slot.is_occupied());
        assert!(slot.try_claim().is_none());

        drop(claim);
        assert!(!slot.is_occupied());
        assert!(slot.try_claim().is_some());
    }

    #[rstest]
    #[case::disabled(None, 5, 5, false)]
    #[case::below_threshold(Some(3), 2, 2, false)]
    #[case::sent_reaches(Some(3), 3, 0, true)]
    #[case::received_reaches(Some(3), 0, 3, true)]
    fn test_counters_limit(
        #[case] disconnect_after: Option<u64>,
        #[case] sent: u64,
        #[case] received: u64,
        #[case] expected: bool,
    ) {
        let mut counters = SessionCounters::default();
        for _ in 0..sent {
            counters.on_sent();
        }
        for _ in 0..received {
            counters.on_received();
        }

        assert_eq!(counters.sent(), sent);
        assert_eq!(counters.received(), received);
        assert_eq!(counters.limit_reached(disconnect_after), expected);
    }
}
