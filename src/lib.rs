//! # GEP Streaming Subscription Client
//!
//! This crate provides a streaming time-series subscription client for the
//! Gateway Exchange Protocol (GEP) used by phasor/SCADA data publishers. It
//! connects to a publisher over TCP, negotiates operational modes, issues
//! subscription commands, and consumes a continuous stream of binary-framed
//! server responses, including GZip-compressed signal index caches and
//! TSSC-compressed measurement payloads, delivering decoded measurements to
//! the host application through registered callbacks.
//!
//! ## Submodules
//!
//! - `transport`: the protocol core.
//!   - `subscriber`: `DataSubscriber`: connection lifecycle, response
//!     dispatch, and the serialized callback pump.
//!   - `connector`: `SubscriberConnector`: cancellable connect/retry loop
//!     with auto-reconnect on peer disconnects.
//!   - `subscription`: `SubscriptionInfo` and connection-string assembly.
//!   - `signal_index_cache`: runtime signal-index → measurement-key mapping.
//!   - `compact` / `tssc`: the two measurement payload formats.
//!   - `framing`, `codec`, `constants`, `common`: wire-level plumbing.
//! - `queue`: the blocking FIFO behind the callback pump.
//! - `mocks`: an in-process mock publisher for tests and benchmarks.
//!
//! ## Usage
//!
//! ```no_run
//! use gep_subscriber::{DataSubscriber, SubscriberConnector, SubscriptionInfo};
//!
//! let subscriber = DataSubscriber::new();
//!
//! subscriber.register_status_message_callback(|message| println!("{}", message));
//! subscriber.register_error_message_callback(|message| eprintln!("{}", message));
//! subscriber.register_new_measurements_callback(|measurements| {
//!     for measurement in measurements {
//!         println!("{} {} = {}", measurement.source, measurement.id, measurement.value);
//!     }
//! });
//!
//! let connector = subscriber.connector();
//! connector.set_hostname("localhost");
//! connector.set_port(6165);
//! connector.set_max_retries(5);
//!
//! let info = SubscriptionInfo {
//!     filter_expression: "FILTER ActiveMeasurements WHERE SignalType = 'FREQ'".to_string(),
//!     ..Default::default()
//! };
//!
//! if SubscriberConnector::connect(&subscriber, info) {
//!     subscriber.subscribe(subscriber.subscription_info()).unwrap();
//! }
//! # subscriber.disconnect();
//! ```

pub mod mocks;
pub mod queue;
pub mod transport;

pub use transport::{
    DataSubscriber, Measurement, MeasurementKey, SignalIndexCache, SubscriberConnector,
    SubscriberError, SubscriptionInfo,
};
