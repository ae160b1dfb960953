//! Serial line port.
//!
//! A background task polls the device, flushes queued outbound bytes,
//! applies requested DTR/RTS levels and refreshes the modem input lines
//! every tick.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_serial::{SerialPort as _, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace, warn};

use crate::buffer::{ByteBuffer, DEFAULT_CAPACITY, OverflowPolicy};
use crate::config::{Parity, SerialConfig, StopBits};
use crate::error::{Error, Result};
use crate::protocol::{HexDump, LinkData, PortEvent, PortSignals};

use super::connection::POLL_INTERVAL;
use super::port::{EVENT_CHANNEL_CAPACITY, Port};

// ============================================================================
// Constants
// ============================================================================

/// Largest single read from the device.
const READ_CHUNK: usize = 4096;

// ============================================================================
// Shared State
// ============================================================================

struct SerialShared {
    inbound: Mutex<ByteBuffer>,
    outbound: Mutex<ByteBuffer>,
    /// Last known line levels.
    signals: Mutex<PortSignals>,
    /// DTR/RTS levels waiting to be written by the worker.
    requested: Mutex<Option<PortSignals>>,
    open: AtomicBool,
    stop: AtomicBool,
    wake: Notify,
    events: broadcast::Sender<PortEvent>,
}

// ============================================================================
// SerialPort
// ============================================================================

/// Serial line port.
pub struct SerialPort {
    config: SerialConfig,
    shared: Arc<SerialShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialPort {
    /// Opens the device described by `config`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serial`] if the device cannot be opened.
    pub fn open(config: SerialConfig) -> Result<Arc<Self>> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let port = Arc::new(Self {
            config,
            shared: Arc::new(SerialShared {
                inbound: Mutex::new(ByteBuffer::new(DEFAULT_CAPACITY)),
                outbound: Mutex::new(ByteBuffer::with_policy(
                    DEFAULT_CAPACITY,
                    OverflowPolicy::EvictOldest,
                )),
                signals: Mutex::new(PortSignals::default()),
                requested: Mutex::new(None),
                open: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                wake: Notify::new(),
                events,
            }),
            worker: Mutex::new(None),
        });
        port.start()?;
        Ok(port)
    }

    /// Device settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn start(&self) -> Result<()> {
        if self.shared.open.load(Ordering::SeqCst) {
            return Ok(());
        }

        let format = self.config.format;
        let stream = tokio_serial::new(&self.config.device, self.config.baud_rate)
            .data_bits(data_bits(format.data_bits))
            .parity(parity(format.parity))
            .stop_bits(stop_bits(format.stop_bits))
            .open_native_async()
            .map_err(|e| Error::serial(format!("{}: {e}", self.config.device)))?;

        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.open.store(true, Ordering::SeqCst);
        info!(device = %self.config.device, baud = self.config.baud_rate, "Serial port opened");

        let worker = tokio::spawn(run_serial_loop(stream, Arc::clone(&self.shared)));
        *self.worker.lock() = Some(worker);
        Ok(())
    }

    async fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(error = %e, "Serial task failed");
        }
        self.shared.open.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// SerialPort - Port
// ============================================================================

#[async_trait]
impl Port for SerialPort {
    fn send(&self, data: LinkData) {
        self.shared.outbound.lock().add(&data.data);
    }

    fn receive(&self) -> Option<LinkData> {
        let bytes = self.shared.inbound.lock().take_all();
        (!bytes.is_empty()).then(|| LinkData::new(bytes))
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    async fn set_open(&self, open: bool) -> Result<()> {
        if open {
            self.start()
        } else {
            self.stop().await;
            Ok(())
        }
    }

    fn signals(&self) -> PortSignals {
        *self.shared.signals.lock()
    }

    fn set_signals(&self, signals: PortSignals) {
        {
            let mut current = self.shared.signals.lock();
            current.dtr = signals.dtr;
            current.rts = signals.rts;
        }
        *self.shared.requested.lock() = Some(signals);
    }

    fn events(&self) -> broadcast::Receiver<PortEvent> {
        self.shared.events.subscribe()
    }

    fn name(&self) -> String {
        format!("Serial ({})", self.config.device)
    }

    fn request_shutdown(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    async fn shutdown(&self) {
        self.stop().await;
        debug!(device = %self.config.device, "Serial port shut down");
    }
}

// ============================================================================
// Worker
// ============================================================================

async fn run_serial_loop(mut stream: SerialStream, shared: Arc<SerialShared>) {
    let mut buf = vec![0u8; READ_CHUNK];

    while !shared.stop.load(Ordering::SeqCst) {
        tokio::select! {
            result = stream.read(&mut buf) => match result {
                Ok(0) => {}
                Ok(n) => {
                    trace!(bytes = %HexDump(&buf[..n]), "Serial read");
                    shared.inbound.lock().add(&buf[..n]);
                    let _ = shared.events.send(PortEvent::DataReceived);
                }
                Err(e) => {
                    warn!(error = %e, "Serial read failed");
                    break;
                }
            },
            () = shared.wake.notified() => {}
            () = sleep(POLL_INTERVAL) => {}
        }

        let requested = shared.requested.lock().take();
        if let Some(requested) = requested
            && let Err(e) = apply_signals(&mut stream, requested)
        {
            warn!(error = %e, "Failed to set serial control lines");
        }

        match read_signals(&mut stream) {
            Ok((cts, dsr, cd, ri)) => {
                let mut signals = shared.signals.lock();
                signals.cts = cts;
                signals.dsr = dsr;
                signals.cd = cd;
                signals.ri = ri;
            }
            Err(e) => trace!(error = %e, "Serial line status unavailable"),
        }

        let pending = shared.outbound.lock().take_all();
        if !pending.is_empty() {
            if let Err(e) = stream.write_all(&pending).await {
                warn!(error = %e, "Serial write failed");
                break;
            }
            trace!(bytes = %HexDump(&pending), "Serial write");
        }
    }

    shared.open.store(false, Ordering::SeqCst);
    debug!("Serial loop terminated");
}

fn apply_signals(stream: &mut SerialStream, signals: PortSignals) -> tokio_serial::Result<()> {
    stream.write_data_terminal_ready(signals.dtr)?;
    stream.write_request_to_send(signals.rts)
}

fn read_signals(stream: &mut SerialStream) -> tokio_serial::Result<(bool, bool, bool, bool)> {
    Ok((
        stream.read_clear_to_send()?,
        stream.read_data_set_ready()?,
        stream.read_carrier_detect()?,
        stream.read_ring_indicator()?,
    ))
}

// ============================================================================
// Format Conversion
// ============================================================================

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Mark | Parity::Space => {
            warn!(?parity, "Parity not supported, using none");
            tokio_serial::Parity::None
        }
    }
}

fn stop_bits(stop_bits: StopBits) -> tokio_serial::StopBits {
    match stop_bits {
        StopBits::Two => tokio_serial::StopBits::Two,
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::None | StopBits::OnePointFive => {
            warn!(?stop_bits, "Stop bits not supported, using one");
            tokio_serial::StopBits::One
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_conversion() {
        assert_eq!(data_bits(5), tokio_serial::DataBits::Five);
        assert_eq!(data_bits(8), tokio_serial::DataBits::Eight);
        assert_eq!(parity(Parity::Even), tokio_serial::Parity::Even);
        assert_eq!(parity(Parity::Mark), tokio_serial::Parity::None);
        assert_eq!(stop_bits(StopBits::Two), tokio_serial::StopBits::Two);
        assert_eq!(stop_bits(StopBits::OnePointFive), tokio_serial::StopBits::One);
    }

    #[tokio::test]
    async fn test_missing_device_is_serial_error() {
        let result = SerialPort::open(SerialConfig::new("/dev/linkport-does-not-exist"));
        assert!(matches!(result, Err(Error::Serial { .. })));
    }
}
