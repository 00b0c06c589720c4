//! Connection state management and reconnection backoff.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::traits::TransportError;

/// Connection state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// `HostSession` accepted by the bridge; frames may be published.
    Authenticated,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_authenticated(self) -> bool {
        self == ConnectionState::Authenticated
    }
}

/// Connection manager for tracking state and statistics
pub struct ConnectionManager {
    state: Mutex<ConnectionState>,
    connected_at: Mutex<Option<Instant>>,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    reconnect_attempts: AtomicU32,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            connected_at: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    /// Transition to new state, returning the previous one
    pub fn transition(&self, new_state: ConnectionState) -> ConnectionState {
        let mut state = self.state.lock();
        let old_state = *state;

        match new_state {
            ConnectionState::Connected => {
                *self.connected_at.lock() = Some(Instant::now());
            }
            ConnectionState::Disconnected => {
                *self.connected_at.lock() = None;
            }
            ConnectionState::Reconnecting => {
                self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }

        if old_state != new_state {
            tracing::debug!(from = ?old_state, to = ?new_state, "connection state change");
        }
        *state = new_state;
        old_state
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Get connection duration
    pub fn duration(&self) -> Option<Duration> {
        self.connected_at.lock().map(|t| t.elapsed())
    }

    pub fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Get transfer statistics
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: self.state(),
            duration: self.duration(),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection statistics
#[derive(Clone, Debug)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub duration: Option<Duration>,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub reconnect_attempts: u32,
}

/// Reconnection manager with exponential backoff
pub struct ReconnectionManager {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    current_attempt: AtomicU32,
    cancelled: AtomicBool,
}

impl ReconnectionManager {
    /// Create a new reconnection manager
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            current_attempt: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Attempt reconnection with exponential backoff
    pub async fn reconnect<F, Fut>(&self, mut connect_fn: F) -> Result<(), TransportError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), TransportError>>,
    {
        self.current_attempt.store(0, Ordering::Relaxed);

        loop {
            if self.cancelled.load(Ordering::Relaxed) {
                return Err(TransportError::Other("Reconnection cancelled".to_string()));
            }

            let attempt = self.current_attempt.load(Ordering::Relaxed);
            if attempt >= self.max_attempts {
                return Err(TransportError::Other("Max reconnection attempts reached".to_string()));
            }

            match connect_fn().await {
                Ok(()) => {
                    return Ok(());
                }
                Err(e) => {
                    let delay = self.calculate_backoff(attempt);
                    tracing::debug!(attempt, ?delay, error = %e, "reconnect attempt failed");
                    tokio::time::sleep(delay).await;
                    self.current_attempt.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Exponential delay capped at `max_delay`, with up to 10% jitter
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * 2.0_f64.powi(attempt as i32);
        let delay = delay.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.0..=0.1) * delay;
        Duration::from_secs_f64((delay + jitter).min(self.max_delay.as_secs_f64()))
    }

    /// Cancel reconnection attempts
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Allow reconnection again after an explicit connect
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
        self.current_attempt.store(0, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Get current attempt number
    pub fn current_attempt(&self) -> u32 {
        self.current_attempt.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_state_transitions() {
        let mgr = ConnectionManager::new();
        assert_eq!(mgr.state(), ConnectionState::Disconnected);

        mgr.transition(ConnectionState::Connecting);
        assert_eq!(mgr.state(), ConnectionState::Connecting);

        mgr.transition(ConnectionState::Connected);
        assert!(mgr.duration().is_some());

        let prev = mgr.transition(ConnectionState::Authenticated);
        assert_eq!(prev, ConnectionState::Connected);
        assert!(mgr.state().is_authenticated());

        mgr.transition(ConnectionState::Disconnected);
        assert!(mgr.duration().is_none());
    }

    #[test]
    fn test_frame_counters() {
        let mgr = ConnectionManager::new();
        mgr.record_sent();
        mgr.record_sent();
        mgr.record_received();
        mgr.transition(ConnectionState::Reconnecting);

        let stats = mgr.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.reconnect_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_succeeds_after_failures() {
        let mgr = ReconnectionManager::new(5, Duration::from_millis(10), Duration::from_millis(100));
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let result = mgr
            .reconnect(move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TransportError::Disconnected)
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up() {
        let mgr = ReconnectionManager::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let result = mgr
            .reconnect(|| async { Err(TransportError::Disconnected) })
            .await;
        assert!(result.is_err());
        assert_eq!(mgr.current_attempt(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_reconnect_stops() {
        let mgr = ReconnectionManager::new(3, Duration::from_millis(1), Duration::from_millis(5));
        mgr.cancel();
        assert!(mgr.reconnect(|| async { Ok(()) }).await.is_err());

        mgr.reset();
        assert!(mgr.reconnect(|| async { Ok(()) }).await.is_ok());
    }

    proptest! {
        #[test]
        fn prop_backoff_is_capped(attempt in 0..64u32) {
            let mgr = ReconnectionManager::new(64, Duration::from_millis(100), Duration::from_secs(5));
            prop_assert!(mgr.calculate_backoff(attempt) <= Duration::from_secs(5));
        }
    }
}
