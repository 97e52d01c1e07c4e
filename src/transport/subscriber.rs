//! # Data Subscriber
//!
//! The subscriber side of the Gateway Exchange Protocol. A `DataSubscriber`
//! owns one TCP command channel, an optional UDP data channel, and the worker
//! threads that service them:
//!
//! - the **command reader** drives all TCP frame reads and response handling;
//!   every mutation of the signal index cache, base-time offsets and TSSC
//!   state happens on this thread;
//! - the **data reader** (UDP subscriptions only) feeds datagrams through the
//!   same response dispatcher;
//! - the **callback pump** drains a blocking queue of dispatch events and
//!   invokes user callbacks strictly in enqueue order, so no user callback
//!   ever runs concurrently with another or blocks socket I/O.
//!
//! `DataSubscriber` is a cheap cloneable handle; the worker threads hold
//! clones, so the connection stays alive until `disconnect` is called.
//! Teardown is safe from any thread: handlers that detect peer termination
//! schedule the disconnect on a fresh worker, and a disconnect issued from
//! inside a callback re-dispatches itself the same way to avoid a self-join.

use crate::queue::BlockingQueue;
use crate::transport::codec::PayloadReader;
use crate::transport::common::{Measurement, SubscriberError, MAX_PACKET_SIZE, PAYLOAD_HEADER_SIZE};
use crate::transport::compact::CompactMeasurementDecoder;
use crate::transport::connector::SubscriberConnector;
use crate::transport::constants::{
    compression_modes, data_packet_flags, operational_encoding, operational_modes, server_command,
    server_response,
};
use crate::transport::framing::{write_command_frame, FrameReader, RESPONSE_HEADER_SIZE};
use crate::transport::signal_index_cache::SignalIndexCache;
use crate::transport::subscription::SubscriptionInfo;
use crate::transport::tssc::{TsscDecoder, TSSC_VERSION};
use bytes::BytesMut;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Callback receiving a status or error message.
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// Callback receiving the publisher's data start time in ticks.
pub type DataStartTimeCallback = Arc<dyn Fn(i64) + Send + Sync>;
/// Callback receiving a raw metadata payload.
pub type MetadataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
/// Callback receiving one decoded measurement batch per data packet.
pub type NewMeasurementsCallback = Arc<dyn Fn(&[Measurement]) + Send + Sync>;
/// Parameterless notification callback.
pub type NotificationCallback = Arc<dyn Fn() + Send + Sync>;

/// Poll interval for the UDP reader; bounds how long teardown can lag.
const DATA_CHANNEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One dispatch record consumed by the callback pump.
enum CallbackEvent {
    StatusMessage(String),
    ErrorMessage(String),
    DataStartTime(i64),
    Metadata(Vec<u8>),
    NewMeasurements(Vec<Measurement>),
    ProcessingComplete(String),
    ConfigurationChanged,
}

#[derive(Default)]
struct CallbackRegistry {
    status_message: RwLock<Option<MessageCallback>>,
    error_message: RwLock<Option<MessageCallback>>,
    data_start_time: RwLock<Option<DataStartTimeCallback>>,
    metadata: RwLock<Option<MetadataCallback>>,
    new_measurements: RwLock<Option<NewMeasurementsCallback>>,
    processing_complete: RwLock<Option<MessageCallback>>,
    configuration_changed: RwLock<Option<NotificationCallback>>,
    connection_terminated: RwLock<Option<NotificationCallback>>,
    auto_reconnect: RwLock<Option<NotificationCallback>>,
}

struct TsscState {
    decoder: TsscDecoder,
    sequence_number: u16,
    reset_requested: bool,
}

struct SubscriberInner {
    connector: SubscriberConnector,
    subscription_info: RwLock<SubscriptionInfo>,

    compress_payload_data: AtomicBool,
    compress_metadata: AtomicBool,
    compress_signal_index_cache: AtomicBool,

    connected: AtomicBool,
    subscribed: AtomicBool,
    disconnecting: AtomicBool,
    data_channel_stopping: AtomicBool,

    total_command_channel_bytes: AtomicU64,
    total_data_channel_bytes: AtomicU64,
    total_measurements: AtomicU64,

    signal_index_cache: RwLock<SignalIndexCache>,
    base_time_offsets: RwLock<[i64; 2]>,
    time_index: AtomicI32,

    tssc: Mutex<TsscState>,

    callbacks: CallbackRegistry,
    callback_queue: BlockingQueue<CallbackEvent>,

    command_channel: Mutex<Option<TcpStream>>,
    data_channel: Mutex<Option<UdpSocket>>,
    host_address: Mutex<Option<IpAddr>>,

    write_buffer: Mutex<BytesMut>,

    callback_thread: Mutex<Option<JoinHandle<()>>>,
    callback_thread_id: Mutex<Option<ThreadId>>,
    command_thread: Mutex<Option<JoinHandle<()>>>,
    data_thread: Mutex<Option<JoinHandle<()>>>,

    disconnect_guard: Mutex<()>,
}

/// GEP streaming subscription client.
///
/// Create with [`DataSubscriber::new`], register callbacks, then either call
/// [`connect`](DataSubscriber::connect) directly or drive the connection
/// through a [`SubscriberConnector`] retry loop. After connecting, call
/// [`subscribe`](DataSubscriber::subscribe) to start the measurement stream.
///
/// Cloning produces another handle to the same subscriber. Always call
/// [`disconnect`](DataSubscriber::disconnect) when finished: the worker
/// threads hold their own handles and keep the connection alive until told
/// to stop.
#[derive(Clone)]
pub struct DataSubscriber {
    inner: Arc<SubscriberInner>,
}

impl DataSubscriber {
    pub fn new() -> Self {
        DataSubscriber {
            inner: Arc::new(SubscriberInner {
                connector: SubscriberConnector::new(),
                subscription_info: RwLock::new(SubscriptionInfo::default()),
                compress_payload_data: AtomicBool::new(true),
                compress_metadata: AtomicBool::new(true),
                compress_signal_index_cache: AtomicBool::new(true),
                connected: AtomicBool::new(false),
                subscribed: AtomicBool::new(false),
                disconnecting: AtomicBool::new(false),
                data_channel_stopping: AtomicBool::new(false),
                total_command_channel_bytes: AtomicU64::new(0),
                total_data_channel_bytes: AtomicU64::new(0),
                total_measurements: AtomicU64::new(0),
                signal_index_cache: RwLock::new(SignalIndexCache::new()),
                base_time_offsets: RwLock::new([0, 0]),
                time_index: AtomicI32::new(0),
                tssc: Mutex::new(TsscState {
                    decoder: TsscDecoder::new(),
                    sequence_number: 0,
                    reset_requested: false,
                }),
                callbacks: CallbackRegistry::default(),
                callback_queue: BlockingQueue::new(),
                command_channel: Mutex::new(None),
                data_channel: Mutex::new(None),
                host_address: Mutex::new(None),
                write_buffer: Mutex::new(BytesMut::with_capacity(MAX_PACKET_SIZE)),
                callback_thread: Mutex::new(None),
                callback_thread_id: Mutex::new(None),
                command_thread: Mutex::new(None),
                data_thread: Mutex::new(None),
                disconnect_guard: Mutex::new(()),
            }),
        }
    }

    /// Downgraded handle that does not keep the subscriber alive; used by
    /// reconnect controllers to avoid a reference cycle.
    pub(crate) fn downgrade(&self) -> WeakDataSubscriber {
        WeakDataSubscriber {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // --- callback registration ---

    pub fn register_status_message_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.inner.callbacks.status_message.write() = Some(Arc::new(callback));
    }

    pub fn register_error_message_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.inner.callbacks.error_message.write() = Some(Arc::new(callback));
    }

    pub fn register_data_start_time_callback(&self, callback: impl Fn(i64) + Send + Sync + 'static) {
        *self.inner.callbacks.data_start_time.write() = Some(Arc::new(callback));
    }

    pub fn register_metadata_callback(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.inner.callbacks.metadata.write() = Some(Arc::new(callback));
    }

    pub fn register_new_measurements_callback(
        &self,
        callback: impl Fn(&[Measurement]) + Send + Sync + 'static,
    ) {
        *self.inner.callbacks.new_measurements.write() = Some(Arc::new(callback));
    }

    pub fn register_processing_complete_callback(
        &self,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) {
        *self.inner.callbacks.processing_complete.write() = Some(Arc::new(callback));
    }

    pub fn register_configuration_changed_callback(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) {
        *self.inner.callbacks.configuration_changed.write() = Some(Arc::new(callback));
    }

    pub fn register_connection_terminated_callback(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) {
        *self.inner.callbacks.connection_terminated.write() = Some(Arc::new(callback));
    }

    /// Registers the callback a reconnect controller uses to re-enter its
    /// retry loop after a peer-initiated disconnect.
    pub fn register_auto_reconnect_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.inner.callbacks.auto_reconnect.write() = Some(Arc::new(callback));
    }

    // --- configuration ---

    /// The connector owned by this subscriber; configure host, port and retry
    /// policy through it.
    pub fn connector(&self) -> &SubscriberConnector {
        &self.inner.connector
    }

    pub fn subscription_info(&self) -> SubscriptionInfo {
        self.inner.subscription_info.read().clone()
    }

    pub fn set_subscription_info(&self, info: SubscriptionInfo) {
        *self.inner.subscription_info.write() = info;
    }

    pub fn is_payload_data_compressed(&self) -> bool {
        self.inner.compress_payload_data.load(Ordering::SeqCst)
    }

    /// Payload compression can only change before connecting; the negotiated
    /// mode is fixed for the life of the connection.
    pub fn set_payload_data_compressed(&self, compressed: bool) {
        self.inner
            .compress_payload_data
            .store(compressed, Ordering::SeqCst);
    }

    pub fn is_metadata_compressed(&self) -> bool {
        self.inner.compress_metadata.load(Ordering::SeqCst)
    }

    pub fn set_metadata_compressed(&self, compressed: bool) {
        self.inner.compress_metadata.store(compressed, Ordering::SeqCst);
        if self.inner.connected.load(Ordering::SeqCst) {
            let _ = self.send_operational_modes();
        }
    }

    pub fn is_signal_index_cache_compressed(&self) -> bool {
        self.inner.compress_signal_index_cache.load(Ordering::SeqCst)
    }

    pub fn set_signal_index_cache_compressed(&self, compressed: bool) {
        self.inner
            .compress_signal_index_cache
            .store(compressed, Ordering::SeqCst);
        if self.inner.connected.load(Ordering::SeqCst) {
            let _ = self.send_operational_modes();
        }
    }

    // --- state inspection ---

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscribed.load(Ordering::SeqCst)
    }

    /// Bytes received on the command channel since the last connect.
    pub fn total_command_channel_bytes_received(&self) -> u64 {
        self.inner.total_command_channel_bytes.load(Ordering::SeqCst)
    }

    /// Bytes received on the data channel since the last connect. Without a
    /// UDP data channel all data arrives on the command channel, so that
    /// total is reported instead.
    pub fn total_data_channel_bytes_received(&self) -> u64 {
        if self.inner.subscription_info.read().udp_data_channel {
            self.inner.total_data_channel_bytes.load(Ordering::SeqCst)
        } else {
            self.inner.total_command_channel_bytes.load(Ordering::SeqCst)
        }
    }

    /// Measurements received since the last subscription.
    pub fn total_measurements_received(&self) -> u64 {
        self.inner.total_measurements.load(Ordering::SeqCst)
    }

    /// Snapshot of the current signal index cache.
    pub fn signal_index_cache(&self) -> SignalIndexCache {
        self.inner.signal_index_cache.read().clone()
    }

    /// Current base-time offsets used for compact timestamp reconstruction.
    pub fn base_time_offsets(&self) -> [i64; 2] {
        *self.inner.base_time_offsets.read()
    }

    /// Index of the active base-time offset.
    pub fn time_index(&self) -> i32 {
        self.inner.time_index.load(Ordering::SeqCst)
    }

    // --- connection lifecycle ---

    /// Synchronously connects the command channel and starts the worker
    /// threads. Fails with `AlreadyConnected` when a connection is active.
    pub fn connect(&self, hostname: &str, port: u16) -> Result<(), SubscriberError> {
        let inner = &self.inner;

        if inner.connected.load(Ordering::SeqCst) {
            return Err(SubscriberError::AlreadyConnected);
        }

        inner.total_command_channel_bytes.store(0, Ordering::SeqCst);
        inner.total_data_channel_bytes.store(0, Ordering::SeqCst);
        inner.total_measurements.store(0, Ordering::SeqCst);

        let stream = TcpStream::connect((hostname, port)).map_err(|error| {
            SubscriberError::ConnectFailed {
                message: error.to_string(),
            }
        })?;

        let peer = stream
            .peer_addr()
            .map_err(|error| SubscriberError::ConnectFailed {
                message: error.to_string(),
            })?;
        *inner.host_address.lock() = Some(peer.ip());

        // Compressed-stream state is rebuilt per connection
        {
            let mut tssc = inner.tssc.lock();
            tssc.decoder.reset();
            tssc.sequence_number = 0;
            tssc.reset_requested = false;
        }

        inner.disconnecting.store(false, Ordering::SeqCst);
        inner.data_channel_stopping.store(false, Ordering::SeqCst);
        inner.callback_queue.reset();

        let write_half = stream
            .try_clone()
            .map_err(|error| SubscriberError::ConnectFailed {
                message: error.to_string(),
            })?;
        *inner.command_channel.lock() = Some(write_half);

        let pump = {
            let subscriber = self.clone();
            thread::spawn(move || subscriber.run_callback_pump())
        };
        *inner.callback_thread_id.lock() = Some(pump.thread().id());
        *inner.callback_thread.lock() = Some(pump);

        let reader = {
            let subscriber = self.clone();
            thread::spawn(move || subscriber.run_command_channel(stream))
        };
        *inner.command_thread.lock() = Some(reader);

        if let Err(error) = self.send_operational_modes() {
            self.disconnect_internal(false);
            return Err(error);
        }

        inner.connected.store(true, Ordering::SeqCst);
        debug!("connected to publisher at {}:{}", hostname, port);
        Ok(())
    }

    /// Disconnects and joins all worker threads. A user-requested disconnect
    /// never auto-reconnects; it cancels any in-flight retry loop instead.
    /// Calling this on an already-disconnected subscriber is a no-op.
    pub fn disconnect(&self) {
        self.disconnect_internal(false);
    }

    pub(crate) fn disconnect_internal(&self, auto_reconnect: bool) {
        let inner = &self.inner;

        // A disconnect issued from the callback pump would join itself;
        // re-dispatch it to a detached worker instead
        if Some(thread::current().id()) == *inner.callback_thread_id.lock() {
            let subscriber = self.clone();
            thread::spawn(move || subscriber.disconnect_internal(auto_reconnect));
            return;
        }

        let _guard = inner.disconnect_guard.lock();

        let has_workers =
            inner.callback_thread.lock().is_some() || inner.command_thread.lock().is_some();
        if !inner.connected.load(Ordering::SeqCst) && !has_workers {
            return;
        }

        inner.disconnecting.store(true, Ordering::SeqCst);
        inner.connected.store(false, Ordering::SeqCst);
        inner.subscribed.store(false, Ordering::SeqCst);

        // Release the pump and break the blocking socket reads
        inner.callback_queue.release();
        if let Some(stream) = inner.command_channel.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        inner.data_channel_stopping.store(true, Ordering::SeqCst);
        *inner.data_channel.lock() = None;

        for slot in [&inner.callback_thread, &inner.command_thread, &inner.data_thread] {
            let handle = slot.lock().take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
        *inner.callback_thread_id.lock() = None;

        inner.callback_queue.clear();
        inner.callback_queue.reset();

        let terminated = inner.callbacks.connection_terminated.read().clone();
        if let Some(callback) = terminated {
            callback();
        }

        if auto_reconnect {
            // Kept separate from the terminated callback: one reports, the
            // other re-enters a connect sequence
            let reconnect = inner.callbacks.auto_reconnect.read().clone();
            if let Some(callback) = reconnect {
                callback();
            }
        } else {
            inner.connector.cancel();
        }

        inner.disconnecting.store(false, Ordering::SeqCst);
        debug!("disconnect complete");
    }

    /// Schedules connection termination on a fresh worker so the reader
    /// thread that observed the failure never joins itself.
    fn begin_connection_termination(&self) {
        if self.inner.disconnecting.load(Ordering::SeqCst) {
            return;
        }
        let subscriber = self.clone();
        thread::spawn(move || subscriber.disconnect_internal(true));
    }

    // --- subscription ---

    /// Stores `info` and requests a subscription. An active subscription is
    /// implicitly unsubscribed first so no publisher-side stream leaks.
    pub fn subscribe(&self, info: SubscriptionInfo) -> Result<(), SubscriberError> {
        let inner = &self.inner;

        *inner.subscription_info.write() = info;

        if inner.subscribed.load(Ordering::SeqCst) {
            self.unsubscribe()?;
        }

        inner.total_measurements.store(0, Ordering::SeqCst);

        let info = inner.subscription_info.read().clone();

        if info.udp_data_channel {
            self.start_data_channel(&info)?;
        }

        self.send_server_command(server_command::SUBSCRIBE, &info.to_subscribe_payload())?;

        // The publisher restarts its compressed stream on subscription;
        // expect the sequence reset silently
        inner.tssc.lock().reset_requested = true;
        Ok(())
    }

    /// Stops the data channel and asks the publisher to cancel the current
    /// subscription; `subscribed` clears when the publisher acknowledges.
    pub fn unsubscribe(&self) -> Result<(), SubscriberError> {
        self.stop_data_channel();
        self.send_server_command(server_command::UNSUBSCRIBE, &[])
    }

    fn start_data_channel(&self, info: &SubscriptionInfo) -> Result<(), SubscriberError> {
        let inner = &self.inner;

        let bind_address: SocketAddr = match *inner.host_address.lock() {
            Some(IpAddr::V6(_)) => (Ipv6Addr::UNSPECIFIED, info.data_channel_local_port).into(),
            _ => (Ipv4Addr::UNSPECIFIED, info.data_channel_local_port).into(),
        };

        let socket = UdpSocket::bind(bind_address).map_err(|error| SubscriberError::BindFailed {
            message: format!(
                "Failed to bind data channel to local port {}: {}",
                info.data_channel_local_port, error
            ),
        })?;

        socket
            .set_read_timeout(Some(DATA_CHANNEL_POLL_INTERVAL))
            .map_err(|error| SubscriberError::BindFailed {
                message: error.to_string(),
            })?;

        inner.data_channel_stopping.store(false, Ordering::SeqCst);
        *inner.data_channel.lock() = Some(socket.try_clone().map_err(|error| {
            SubscriberError::BindFailed {
                message: error.to_string(),
            }
        })?);

        let reader = {
            let subscriber = self.clone();
            thread::spawn(move || subscriber.run_data_channel(socket))
        };
        *inner.data_thread.lock() = Some(reader);
        Ok(())
    }

    /// Stops only the UDP reader. Uses a dedicated flag so the command
    /// reader cannot mistake an unsubscribe for a full disconnect.
    fn stop_data_channel(&self) {
        let inner = &self.inner;

        inner.data_channel_stopping.store(true, Ordering::SeqCst);
        *inner.data_channel.lock() = None;

        let handle = inner.data_thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    // --- command channel sends ---

    /// Sends a command frame to the publisher. Write failures surface both
    /// through the returned error and the error-message callback.
    pub fn send_server_command(
        &self,
        command_code: u8,
        payload: &[u8],
    ) -> Result<(), SubscriberError> {
        let inner = &self.inner;

        let mut channel = inner.command_channel.lock();
        let stream = channel.as_mut().ok_or_else(|| SubscriberError::Io {
            message: "Command channel is not connected".to_string(),
        })?;

        let mut buffer = inner.write_buffer.lock();
        write_command_frame(&mut buffer, command_code, payload);

        if let Err(error) = stream.write_all(&buffer) {
            let message = format!(
                "Error sending command 0x{:02x} to publisher: {}",
                command_code, error
            );
            self.dispatch_error_message(message.clone());
            return Err(SubscriberError::Io { message });
        }

        Ok(())
    }

    fn send_operational_modes(&self) -> Result<(), SubscriberError> {
        let inner = &self.inner;
        let modes = build_operational_modes(
            inner.compress_payload_data.load(Ordering::SeqCst),
            inner.compress_metadata.load(Ordering::SeqCst),
            inner.compress_signal_index_cache.load(Ordering::SeqCst),
            inner.subscription_info.read().udp_data_channel,
        );
        self.send_server_command(server_command::DEFINE_OPERATIONAL_MODES, &modes.to_be_bytes())
    }

    // --- worker threads ---

    fn run_callback_pump(self) {
        loop {
            self.inner.callback_queue.wait_for_data();

            if self.inner.disconnecting.load(Ordering::SeqCst) {
                return;
            }

            if let Some(event) = self.inner.callback_queue.dequeue() {
                self.invoke_callback(event);
            }
        }
    }

    fn run_command_channel(self, stream: TcpStream) {
        let mut reader = FrameReader::new(stream);

        loop {
            if self.inner.disconnecting.load(Ordering::SeqCst) {
                return;
            }

            match reader.read_frame() {
                Ok(frame) => {
                    self.inner
                        .total_command_channel_bytes
                        .fetch_add((PAYLOAD_HEADER_SIZE + frame.len()) as u64, Ordering::SeqCst);
                    self.process_server_response(frame);
                }
                Err(_) if self.inner.disconnecting.load(Ordering::SeqCst) => return,
                Err(error) => {
                    match error.kind() {
                        io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted => {
                            // Connection closed by peer; terminate
                        }
                        _ => {
                            self.dispatch_error_message(format!(
                                "Error reading data from command channel: {}",
                                error
                            ));
                        }
                    }
                    self.begin_connection_termination();
                    return;
                }
            }
        }
    }

    fn run_data_channel(self, socket: UdpSocket) {
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        loop {
            if self.inner.disconnecting.load(Ordering::SeqCst)
                || self.inner.data_channel_stopping.load(Ordering::SeqCst)
            {
                return;
            }

            match socket.recv_from(&mut buffer) {
                Ok((length, _)) => {
                    self.inner
                        .total_data_channel_bytes
                        .fetch_add(length as u64, Ordering::SeqCst);
                    self.process_server_response(&buffer[..length]);
                }
                Err(error)
                    if error.kind() == io::ErrorKind::WouldBlock
                        || error.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(_)
                    if self.inner.disconnecting.load(Ordering::SeqCst)
                        || self.inner.data_channel_stopping.load(Ordering::SeqCst) =>
                {
                    return;
                }
                Err(error) => {
                    self.dispatch_error_message(format!(
                        "Error reading data from data channel: {}",
                        error
                    ));
                    return;
                }
            }
        }
    }

    // --- response dispatch ---

    /// Routes one frame body by its response code. Runs on the reader thread
    /// that consumed the frame; user callbacks are never invoked from here.
    fn process_server_response(&self, frame: &[u8]) {
        if frame.len() < RESPONSE_HEADER_SIZE {
            self.dispatch_error_message(format!(
                "Undersized server response: {} bytes",
                frame.len()
            ));
            return;
        }

        let response_code = frame[0];
        let command_code = frame[1];
        let body = &frame[2..];

        match response_code {
            server_response::SUCCEEDED => self.handle_succeeded(command_code, body),
            server_response::FAILED => self.handle_failed(command_code, body),
            server_response::DATA_PACKET => self.handle_data_packet(body),
            server_response::DATA_START_TIME => self.handle_data_start_time(body),
            server_response::PROCESSING_COMPLETE => self.handle_processing_complete(body),
            server_response::UPDATE_SIGNAL_INDEX_CACHE => self.handle_update_signal_index_cache(body),
            server_response::UPDATE_BASE_TIMES => self.handle_update_base_times(body),
            server_response::CONFIGURATION_CHANGED => self.handle_configuration_changed(body),
            server_response::NO_OP => {}
            code => self.dispatch_error_message(format!(
                "Encountered unexpected server response code: 0x{:02x}",
                code
            )),
        }
    }

    fn handle_succeeded(&self, command_code: u8, body: &[u8]) {
        match command_code {
            // Metadata refresh succeeds with the metadata itself, not a message
            server_command::METADATA_REFRESH => {
                self.inner
                    .callback_queue
                    .enqueue(CallbackEvent::Metadata(body.to_vec()));
            }
            server_command::SUBSCRIBE | server_command::UNSUBSCRIBE => {
                self.inner.subscribed.store(
                    command_code == server_command::SUBSCRIBE,
                    Ordering::SeqCst,
                );
                self.dispatch_success_message(command_code, body);
            }
            _ => {
                self.dispatch_success_message(command_code, body);
            }
        }
    }

    fn dispatch_success_message(&self, command_code: u8, body: &[u8]) {
        let message = String::from_utf8_lossy(body);
        self.dispatch_status_message(format!(
            "Received success code in response to server command 0x{:02x}: {}",
            command_code, message
        ));
    }

    fn handle_failed(&self, command_code: u8, body: &[u8]) {
        let message = String::from_utf8_lossy(body);
        self.dispatch_error_message(format!(
            "Received failure code from server command 0x{:02x}: {}",
            command_code, message
        ));
    }

    fn handle_data_packet(&self, body: &[u8]) {
        if let Err(error) = self.parse_data_packet(body) {
            self.dispatch_error_message(error.to_string());
        }
    }

    fn parse_data_packet(&self, body: &[u8]) -> Result<(), SubscriberError> {
        let mut reader = PayloadReader::new(body);
        let flags = reader.read_u8()?;

        let info = self.inner.subscription_info.read().clone();
        let mut include_time = info.include_time;
        let mut frame_level_timestamp = None;

        if flags & data_packet_flags::SYNCHRONIZED > 0 {
            frame_level_timestamp = Some(reader.read_i64()?);
            include_time = false;
        }

        let count = reader.read_u32()?;
        self.inner
            .total_measurements
            .fetch_add(count as u64, Ordering::SeqCst);

        let payload = &body[reader.position()..];

        let measurements = if flags & data_packet_flags::COMPRESSED > 0 {
            self.parse_tssc_measurements(payload)?
        } else {
            self.parse_compact_measurements(
                payload,
                include_time,
                info.use_millisecond_resolution,
                frame_level_timestamp,
            )
        };

        self.inner
            .callback_queue
            .enqueue(CallbackEvent::NewMeasurements(measurements));
        Ok(())
    }

    fn parse_tssc_measurements(&self, payload: &[u8]) -> Result<Vec<Measurement>, SubscriberError> {
        let mut reader = PayloadReader::new(payload);

        let version = reader.read_u8()?;
        if version != TSSC_VERSION {
            return Err(SubscriberError::Protocol {
                message: format!("TSSC version not recognized: 0x{:02x}", version),
            });
        }

        let sequence_number = reader.read_u16()?;
        let mut tssc = self.inner.tssc.lock();

        if sequence_number == 0 && tssc.sequence_number > 0 {
            if !tssc.reset_requested {
                self.dispatch_status_message(format!(
                    "TSSC algorithm reset before sequence number: {}",
                    tssc.sequence_number
                ));
            }
            tssc.decoder.reset();
            tssc.sequence_number = 0;
            tssc.reset_requested = false;
        }

        if tssc.sequence_number != sequence_number {
            if !tssc.reset_requested {
                self.dispatch_error_message(format!(
                    "TSSC is out of sequence. Expecting: {}, Received: {}",
                    tssc.sequence_number, sequence_number
                ));
            }
            // Ignore packets until the reset is observed
            return Ok(Vec::new());
        }

        tssc.decoder.set_buffer(&payload[reader.position()..]);

        let mut measurements = Vec::new();
        {
            let cache = self.inner.signal_index_cache.read();
            loop {
                match tssc.decoder.try_get_measurement() {
                    Ok(Some((id, timestamp, quality, value))) => {
                        // Ids that no longer resolve are dropped silently
                        if let Some(key) = cache.measurement_key(id) {
                            measurements.push(Measurement {
                                signal_id: key.signal_id,
                                source: key.source.clone(),
                                id: key.id,
                                timestamp,
                                flags: quality,
                                value,
                            });
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        self.dispatch_error_message(format!("Decompression failure: {}", error));
                        break;
                    }
                }
            }
        }

        // The expected sequence advances even when a block failed mid-decode
        tssc.sequence_number = tssc.sequence_number.wrapping_add(1);
        if tssc.sequence_number == 0 {
            // Zero is reserved for publisher-side resets
            tssc.sequence_number = 1;
        }

        Ok(measurements)
    }

    fn parse_compact_measurements(
        &self,
        payload: &[u8],
        include_time: bool,
        use_millisecond_resolution: bool,
        frame_level_timestamp: Option<i64>,
    ) -> Vec<Measurement> {
        let cache = self.inner.signal_index_cache.read();
        let base_time_offsets = *self.inner.base_time_offsets.read();
        let decoder = CompactMeasurementDecoder::new(
            &cache,
            base_time_offsets,
            include_time,
            use_millisecond_resolution,
        );

        let mut measurements = Vec::new();
        let mut reader = PayloadReader::new(payload);

        while reader.remaining() > 0 {
            match decoder.parse(&mut reader) {
                Ok(Some(mut measurement)) => {
                    if let Some(timestamp) = frame_level_timestamp {
                        measurement.timestamp = timestamp;
                    }
                    measurements.push(measurement);
                }
                Ok(None) => {}
                Err(error) => {
                    self.dispatch_error_message(format!("Error parsing measurement: {}", error));
                    break;
                }
            }
        }

        measurements
    }

    fn handle_data_start_time(&self, body: &[u8]) {
        let mut reader = PayloadReader::new(body);
        match reader.read_i64() {
            Ok(start_time) => self
                .inner
                .callback_queue
                .enqueue(CallbackEvent::DataStartTime(start_time)),
            Err(error) => {
                self.dispatch_error_message(format!("Malformed data start time: {}", error))
            }
        }
    }

    fn handle_processing_complete(&self, body: &[u8]) {
        self.inner
            .callback_queue
            .enqueue(CallbackEvent::ProcessingComplete(
                String::from_utf8_lossy(body).into_owned(),
            ));
    }

    fn handle_update_signal_index_cache(&self, body: &[u8]) {
        let compressed = self.inner.compress_signal_index_cache.load(Ordering::SeqCst);

        // Parse into a fresh cache and swap so a malformed update cannot
        // corrupt the mapping in use
        match SignalIndexCache::parse(body, compressed) {
            Ok(cache) => {
                debug!("signal index cache updated with {} mappings", cache.len());
                *self.inner.signal_index_cache.write() = cache;
            }
            Err(error) => self.dispatch_error_message(format!(
                "Failed to parse signal index cache: {}",
                error
            )),
        }
    }

    fn handle_update_base_times(&self, body: &[u8]) {
        let mut reader = PayloadReader::new(body);

        let parsed: Result<(i32, [i64; 2]), SubscriberError> = (|| {
            let time_index = reader.read_i32()?;
            let offsets = [reader.read_i64()?, reader.read_i64()?];
            Ok((time_index, offsets))
        })();

        match parsed {
            Ok((time_index, offsets)) => {
                self.inner.time_index.store(time_index, Ordering::SeqCst);
                *self.inner.base_time_offsets.write() = offsets;
            }
            Err(error) => {
                self.dispatch_error_message(format!("Malformed base time update: {}", error))
            }
        }
    }

    fn handle_configuration_changed(&self, _body: &[u8]) {
        self.inner
            .callback_queue
            .enqueue(CallbackEvent::ConfigurationChanged);
    }

    // --- callback pump plumbing ---

    fn dispatch_status_message(&self, message: String) {
        self.inner
            .callback_queue
            .enqueue(CallbackEvent::StatusMessage(message));
    }

    fn dispatch_error_message(&self, message: String) {
        self.inner
            .callback_queue
            .enqueue(CallbackEvent::ErrorMessage(message));
    }

    fn invoke_callback(&self, event: CallbackEvent) {
        let callbacks = &self.inner.callbacks;

        match event {
            CallbackEvent::StatusMessage(message) => {
                let callback = callbacks.status_message.read().clone();
                if let Some(callback) = callback {
                    callback(&message);
                }
            }
            CallbackEvent::ErrorMessage(message) => {
                let callback = callbacks.error_message.read().clone();
                if let Some(callback) = callback {
                    callback(&message);
                }
            }
            CallbackEvent::DataStartTime(start_time) => {
                let callback = callbacks.data_start_time.read().clone();
                if let Some(callback) = callback {
                    callback(start_time);
                }
            }
            CallbackEvent::Metadata(payload) => {
                let callback = callbacks.metadata.read().clone();
                if let Some(callback) = callback {
                    callback(&payload);
                }
            }
            CallbackEvent::NewMeasurements(measurements) => {
                let callback = callbacks.new_measurements.read().clone();
                if let Some(callback) = callback {
                    callback(&measurements);
                }
            }
            CallbackEvent::ProcessingComplete(message) => {
                let callback = callbacks.processing_complete.read().clone();
                if let Some(callback) = callback {
                    callback(&message);
                }
            }
            CallbackEvent::ConfigurationChanged => {
                let callback = callbacks.configuration_changed.read().clone();
                if let Some(callback) = callback {
                    callback();
                }
            }
        }
    }
}

impl Default for DataSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

/// Weak counterpart of [`DataSubscriber`]; upgrades to a full handle while
/// the subscriber is still alive.
pub(crate) struct WeakDataSubscriber {
    inner: Weak<SubscriberInner>,
}

impl WeakDataSubscriber {
    pub(crate) fn upgrade(&self) -> Option<DataSubscriber> {
        self.inner.upgrade().map(|inner| DataSubscriber { inner })
    }
}

/// Assembles the operational-modes word. GZip, UTF-8 and the common
/// serialization format are always requested; TSSC payload compression is
/// only possible over the stateful TCP channel.
fn build_operational_modes(
    compress_payload_data: bool,
    compress_metadata: bool,
    compress_signal_index_cache: bool,
    udp_data_channel: bool,
) -> u32 {
    let mut modes = compression_modes::GZIP;

    modes |= operational_encoding::UTF8;
    modes |= operational_modes::USE_COMMON_SERIALIZATION_FORMAT;

    if compress_payload_data && !udp_data_channel {
        modes |= operational_modes::COMPRESS_PAYLOAD_DATA | compression_modes::TSSC;
    }

    if compress_metadata {
        modes |= operational_modes::COMPRESS_METADATA;
    }

    if compress_signal_index_cache {
        modes |= operational_modes::COMPRESS_SIGNAL_INDEX_CACHE;
    }

    modes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operational_modes_word() {
        let base = compression_modes::GZIP
            | operational_encoding::UTF8
            | operational_modes::USE_COMMON_SERIALIZATION_FORMAT;

        assert_eq!(build_operational_modes(false, false, false, false), base);

        assert_eq!(
            build_operational_modes(true, true, true, false),
            base | operational_modes::COMPRESS_PAYLOAD_DATA
                | compression_modes::TSSC
                | operational_modes::COMPRESS_METADATA
                | operational_modes::COMPRESS_SIGNAL_INDEX_CACHE
        );

        // TSSC is stateful and cannot ride the lossy UDP channel
        assert_eq!(build_operational_modes(true, false, false, true), base);
    }

    #[test]
    fn test_new_subscriber_defaults() {
        let subscriber = DataSubscriber::new();
        assert!(!subscriber.is_connected());
        assert!(!subscriber.is_subscribed());
        assert!(subscriber.is_payload_data_compressed());
        assert!(subscriber.is_metadata_compressed());
        assert!(subscriber.is_signal_index_cache_compressed());
        assert_eq!(subscriber.base_time_offsets(), [0, 0]);
        assert_eq!(subscriber.time_index(), 0);
        assert_eq!(subscriber.total_measurements_received(), 0);
    }

    #[test]
    fn test_send_without_connection_is_error() {
        let subscriber = DataSubscriber::new();
        let result = subscriber.send_server_command(server_command::METADATA_REFRESH, &[]);
        assert!(matches!(result, Err(SubscriberError::Io { .. })));
    }
}
