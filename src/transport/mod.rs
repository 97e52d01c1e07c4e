//! # GEP Transport Layer
//!
//! Everything that speaks the Gateway Exchange Protocol on the wire:
//! framing, protocol constants, payload codecs, the signal index cache, the
//! compact and TSSC measurement decoders, the subscription engine, and the
//! subscriber connection lifecycle.
//!
//! ## Submodules
//!
//! - `common`: shared types (`Measurement`, `SubscriberError`) and sizes.
//! - `constants`: command/response codes, packet flags, operational modes.
//! - `codec`: big-endian payload reader, 7-bit varints, GUID byte order.
//! - `framing`: length-prefixed frame reader and command frame writer.
//! - `signal_index_cache`: runtime signal-index mapping and payload parser.
//! - `compact`: stateless compact measurement decoder.
//! - `tssc`: stateful compressed measurement codec.
//! - `subscription`: `SubscriptionInfo` and connection-string assembly.
//! - `subscriber`: the `DataSubscriber` and its worker threads.
//! - `connector`: cancellable retry loop driving the subscriber lifecycle.

pub mod codec;
pub mod common;
pub mod compact;
pub mod connector;
pub mod constants;
pub mod framing;
pub mod signal_index_cache;
pub mod subscriber;
pub mod subscription;
pub mod tssc;

pub use common::{Measurement, SubscriberError};
pub use connector::SubscriberConnector;
pub use signal_index_cache::{MeasurementKey, SignalIndexCache};
pub use subscriber::DataSubscriber;
pub use subscription::SubscriptionInfo;
