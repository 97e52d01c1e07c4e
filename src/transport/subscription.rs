//! # Subscription Engine
//!
//! `SubscriptionInfo` captures everything a subscription request can carry;
//! this module serializes it into the publisher's connection-string form and
//! assembles the `Subscribe` command payload. Key spellings here are wire
//! contract: publishers parse these exact names.

use crate::transport::constants::data_packet_flags;
use serde::{Deserialize, Serialize};

/// Subscription configuration serialized into the `Subscribe` request.
///
/// # Fields
///
/// * `remotely_synchronized`: request frame-synchronized data packets.
/// * `throttled`: publisher only tracks and sends the latest measurements.
/// * `udp_data_channel`: receive data packets over a separate UDP socket.
/// * `data_channel_local_port`: local UDP port to bind when `udp_data_channel`.
/// * `include_time`: serialize per-measurement timestamps.
/// * `lag_time`/`lead_time`: allowed clock skew, in seconds.
/// * `use_local_clock_as_real_time`: publisher sorts against its local clock.
/// * `use_millisecond_resolution`: compact timestamps at millisecond precision.
/// * `processing_interval`: temporal replay interval; `-1` leaves the
///   publisher default.
/// * `filter_expression`: input measurement selection expression.
/// * `start_time`/`stop_time`/`constraint_parameters`: temporal constraints.
/// * `extra_connection_string_parameters`: appended verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub remotely_synchronized: bool,
    pub throttled: bool,
    pub udp_data_channel: bool,
    pub data_channel_local_port: u16,
    pub include_time: bool,
    pub lag_time: f64,
    pub lead_time: f64,
    pub use_local_clock_as_real_time: bool,
    pub use_millisecond_resolution: bool,
    pub processing_interval: i32,
    pub filter_expression: String,
    pub start_time: String,
    pub stop_time: String,
    pub constraint_parameters: String,
    pub extra_connection_string_parameters: String,
}

impl Default for SubscriptionInfo {
    fn default() -> Self {
        SubscriptionInfo {
            remotely_synchronized: false,
            throttled: false,
            udp_data_channel: false,
            data_channel_local_port: 9500,
            include_time: true,
            lag_time: 10.0,
            lead_time: 5.0,
            use_local_clock_as_real_time: false,
            use_millisecond_resolution: false,
            processing_interval: -1,
            filter_expression: String::new(),
            start_time: String::new(),
            stop_time: String::new(),
            constraint_parameters: String::new(),
            extra_connection_string_parameters: String::new(),
        }
    }
}

impl SubscriptionInfo {
    /// Builds the subscription connection string.
    ///
    /// The throttle flag is serialized under its historical key
    /// `trackLatestMeasurements`, which publishers require.
    pub fn to_connection_string(&self) -> String {
        let mut connection = String::with_capacity(256);

        connection.push_str(&format!("trackLatestMeasurements={};", self.throttled));
        connection.push_str(&format!("includeTime={};", self.include_time));
        connection.push_str(&format!("lagTime={};", self.lag_time));
        connection.push_str(&format!("leadTime={};", self.lead_time));
        connection.push_str(&format!(
            "useLocalClockAsRealTime={};",
            self.use_local_clock_as_real_time
        ));
        connection.push_str(&format!("processingInterval={};", self.processing_interval));
        connection.push_str(&format!(
            "useMillisecondResolution={};",
            self.use_millisecond_resolution
        ));
        connection.push_str(&format!(
            "assemblyInfo={{source=GepSubscriptionLibrary; version={}; buildDate={}}};",
            env!("CARGO_PKG_VERSION"),
            env!("GEP_BUILD_DATE")
        ));

        if !self.filter_expression.is_empty() {
            connection.push_str(&format!(
                "inputMeasurementKeys={{{}}};",
                self.filter_expression
            ));
        }

        if self.udp_data_channel {
            connection.push_str(&format!(
                "dataChannel={{localport={}}};",
                self.data_channel_local_port
            ));
        }

        if !self.start_time.is_empty() {
            connection.push_str(&format!("startTimeConstraint={};", self.start_time));
        }

        if !self.stop_time.is_empty() {
            connection.push_str(&format!("stopTimeConstraint={};", self.stop_time));
        }

        if !self.constraint_parameters.is_empty() {
            connection.push_str(&format!(
                "timeConstraintParameters={};",
                self.constraint_parameters
            ));
        }

        if !self.extra_connection_string_parameters.is_empty() {
            connection.push_str(&format!("{};", self.extra_connection_string_parameters));
        }

        connection
    }

    /// Assembles the `Subscribe` command payload: a data-packet flag byte,
    /// the big-endian connection-string length, then the UTF-8 string.
    pub fn to_subscribe_payload(&self) -> Vec<u8> {
        let connection_string = self.to_connection_string();

        let mut flags = data_packet_flags::COMPACT;
        if self.remotely_synchronized {
            flags |= data_packet_flags::SYNCHRONIZED;
        }

        let mut payload = Vec::with_capacity(5 + connection_string.len());
        payload.push(flags);
        payload.extend_from_slice(&(connection_string.len() as u32).to_be_bytes());
        payload.extend_from_slice(connection_string.as_bytes());
        payload
    }
}
