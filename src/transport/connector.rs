//! # Subscriber Connector
//!
//! Retry controller that drives a [`DataSubscriber`] through its connection
//! sequence: a cancellable loop of connect attempts separated by a retry
//! interval, with per-failure error reporting. With auto-reconnect enabled
//! the connector registers itself on the subscriber so a peer-initiated
//! disconnect re-enters the same retry loop; an explicit user disconnect
//! cancels it instead.

use crate::transport::subscriber::{DataSubscriber, MessageCallback, NotificationCallback};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Cancellable retry loop configuration for a subscriber connection.
///
/// Defaults: unbounded retries (`max_retries = -1`), 2000 ms between
/// attempts, auto-reconnect enabled.
pub struct SubscriberConnector {
    hostname: RwLock<String>,
    port: AtomicU16,
    max_retries: AtomicI32,
    retry_interval_ms: AtomicI32,
    auto_reconnect: AtomicBool,

    cancelled: Mutex<bool>,
    cancel_signal: Condvar,

    error_message_callback: RwLock<Option<MessageCallback>>,
    reconnect_callback: RwLock<Option<NotificationCallback>>,
}

impl SubscriberConnector {
    pub fn new() -> Self {
        SubscriberConnector {
            hostname: RwLock::new(String::new()),
            port: AtomicU16::new(0),
            max_retries: AtomicI32::new(-1),
            retry_interval_ms: AtomicI32::new(2000),
            auto_reconnect: AtomicBool::new(true),
            cancelled: Mutex::new(false),
            cancel_signal: Condvar::new(),
            error_message_callback: RwLock::new(None),
            reconnect_callback: RwLock::new(None),
        }
    }

    // --- configuration ---

    pub fn set_hostname(&self, hostname: impl Into<String>) {
        *self.hostname.write() = hostname.into();
    }

    pub fn hostname(&self) -> String {
        self.hostname.read().clone()
    }

    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::SeqCst);
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    /// Maximum connect attempts per sequence; `-1` retries without bound.
    pub fn set_max_retries(&self, max_retries: i32) {
        self.max_retries.store(max_retries, Ordering::SeqCst);
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries.load(Ordering::SeqCst)
    }

    pub fn set_retry_interval(&self, interval_ms: i32) {
        self.retry_interval_ms.store(interval_ms, Ordering::SeqCst);
    }

    pub fn retry_interval(&self) -> i32 {
        self.retry_interval_ms.load(Ordering::SeqCst)
    }

    /// Whether a peer-terminated connection re-enters the retry loop.
    pub fn set_auto_reconnect(&self, auto_reconnect: bool) {
        self.auto_reconnect.store(auto_reconnect, Ordering::SeqCst);
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    /// Registers a callback reporting each failed connect attempt.
    pub fn register_error_message_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.error_message_callback.write() = Some(Arc::new(callback));
    }

    /// Registers a callback invoked after each automatic reconnect attempt
    /// completes.
    pub fn register_reconnect_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.reconnect_callback.write() = Some(Arc::new(callback));
    }

    // --- connection sequence ---

    /// Stores `info` on the subscriber and runs the connection sequence.
    ///
    /// # Returns
    ///
    /// `true` when the subscriber ended up connected.
    pub fn connect(subscriber: &DataSubscriber, info: crate::transport::SubscriptionInfo) -> bool {
        subscriber.set_subscription_info(info);
        Self::connect_subscriber(subscriber)
    }

    /// Runs the retry loop against the subscriber's own connector settings.
    pub fn connect_subscriber(subscriber: &DataSubscriber) -> bool {
        let connector = subscriber.connector();

        if connector.auto_reconnect() {
            // A weak handle avoids a subscriber → callback → subscriber cycle
            let weak = subscriber.downgrade();
            subscriber.register_auto_reconnect_callback(move || {
                if let Some(subscriber) = weak.upgrade() {
                    SubscriberConnector::handle_auto_reconnect(&subscriber);
                }
            });
        }

        *connector.cancelled.lock() = false;

        let hostname = connector.hostname();
        let port = connector.port();
        let max_retries = connector.max_retries();
        let retry_interval = connector.retry_interval();

        let mut attempt = 0;
        loop {
            if connector.is_cancelled() {
                break;
            }
            if max_retries != -1 && attempt >= max_retries {
                break;
            }
            attempt += 1;

            match subscriber.connect(&hostname, port) {
                Ok(()) => break,
                Err(error) => {
                    if let Some(callback) = connector.error_message_callback.read().clone() {
                        let message =
                            format!("Failed to connect to \"{}:{}\": {}", hostname, port, error);
                        // Reported off-thread so a slow handler cannot stall
                        // the retry cadence
                        thread::spawn(move || callback(&message));
                    }

                    connector.wait_retry_interval(retry_interval);
                }
            }
        }

        subscriber.is_connected()
    }

    /// Auto-reconnect entry point invoked by the subscriber after a
    /// peer-initiated disconnect.
    fn handle_auto_reconnect(subscriber: &DataSubscriber) {
        let connector = subscriber.connector();

        if connector.is_cancelled() {
            return;
        }

        if let Some(callback) = connector.error_message_callback.read().clone() {
            callback("Publisher connection terminated. Attempting to reconnect...");
        }

        Self::connect_subscriber(subscriber);

        if !connector.is_cancelled() {
            let callback = connector.reconnect_callback.read().clone();
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    /// Cancels the current and all future connection sequences, waking any
    /// in-progress retry sleep immediately.
    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.cancel_signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    fn wait_retry_interval(&self, interval_ms: i32) {
        let mut cancelled = self.cancelled.lock();
        if *cancelled {
            return;
        }
        let _ = self
            .cancel_signal
            .wait_for(&mut cancelled, Duration::from_millis(interval_ms.max(0) as u64));
    }
}

impl Default for SubscriberConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_defaults() {
        let connector = SubscriberConnector::new();
        assert_eq!(connector.max_retries(), -1);
        assert_eq!(connector.retry_interval(), 2000);
        assert!(connector.auto_reconnect());
        assert!(!connector.is_cancelled());
    }

    #[test]
    fn test_cancel_wakes_retry_sleep() {
        let connector = Arc::new(SubscriberConnector::new());

        let waiter = {
            let connector = Arc::clone(&connector);
            thread::spawn(move || {
                let start = Instant::now();
                connector.wait_retry_interval(10_000);
                start.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(50));
        connector.cancel();

        let elapsed = waiter.join().unwrap();
        assert!(
            elapsed < Duration::from_secs(2),
            "cancel should interrupt the sleep, took {:?}",
            elapsed
        );
    }

    #[test]
    fn test_wait_returns_immediately_when_cancelled() {
        let connector = SubscriberConnector::new();
        connector.cancel();

        let start = Instant::now();
        connector.wait_retry_interval(5_000);
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
