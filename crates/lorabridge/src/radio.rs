//! Radio link interface
//!
//! The physical LoRa transceiver is an external capability behind the
//! [`RadioLink`] trait: bring the radio up on a frequency with a shared
//! channel-isolation code, then poll (non-blocking) for complete inbound
//! frames carrying signal-strength metadata.
//!
//! The link is one-way and best-effort: there is no acknowledgement and
//! the bridge never transmits.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::RadioSettings;
use crate::error::{BridgeError, Result};

/// One received radio frame: the opaque payload plus the measured signal
/// strength of the transmission that carried it.
///
/// Ownership transfers into the bus publish call; frames are never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioFrame {
    /// Raw payload, forwarded byte-for-byte
    pub payload: Bytes,
    /// Received signal strength in dBm
    pub rssi: i32,
}

/// Trait for radio transceiver drivers
#[async_trait]
pub trait RadioLink: Send {
    /// Initialize the transceiver on `frequency_hz` with the shared
    /// channel-isolation code. May be called again after a failure.
    async fn begin(&mut self, frequency_hz: u64, isolation_code: u8) -> Result<()>;

    /// Check for a complete inbound frame
    ///
    /// Returns `None` immediately when nothing has arrived. Must never
    /// block: the ingestion loop calls this every tick.
    async fn poll_frame(&mut self) -> Result<Option<RadioFrame>>;

    /// Driver name (for logging)
    fn name(&self) -> &str;
}

/// Bring the radio up with bounded retries and a delay between attempts
///
/// Startup-only: the steady-state loop never calls this.
pub async fn bring_up_blocking(
    radio: &mut dyn RadioLink,
    settings: &RadioSettings,
    max_attempts: u32,
    retry_delay: Duration,
) -> Result<()> {
    let mut last_reason = String::new();
    for attempt in 1..=max_attempts {
        match radio
            .begin(settings.frequency_hz, settings.isolation_code)
            .await
        {
            Ok(()) => {
                info!(
                    driver = radio.name(),
                    frequency_hz = settings.frequency_hz,
                    isolation_code = format_args!("0x{:02X}", settings.isolation_code),
                    "Radio link up"
                );
                return Ok(());
            }
            Err(e) => {
                warn!(attempt, error = %e, "Radio bring-up attempt failed");
                last_reason = e.to_string();
                tokio::time::sleep(retry_delay).await;
            }
        }
    }

    Err(BridgeError::RadioBringUpFailed {
        attempts: max_attempts,
        reason: last_reason,
    })
}

/// UDP development transport
///
/// Stands in for the transceiver on hosts without radio hardware: each
/// datagram received on the bound port is one frame. The reported signal
/// strength is a fixed placeholder since there is no RF measurement.
pub struct UdpRadio {
    bind_addr: SocketAddr,
    socket: Option<UdpSocket>,
    reported_rssi: i32,
    buf: Vec<u8>,
}

impl UdpRadio {
    /// Maximum accepted datagram size; matches a generous LoRa payload cap
    pub const MAX_FRAME: usize = 512;

    /// Create a transport bound to `bind_addr` on `begin`
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            socket: None,
            reported_rssi: -50,
            buf: vec![0u8; Self::MAX_FRAME],
        }
    }

    /// Override the placeholder signal strength
    pub fn with_reported_rssi(mut self, rssi: i32) -> Self {
        self.reported_rssi = rssi;
        self
    }
}

#[async_trait]
impl RadioLink for UdpRadio {
    async fn begin(&mut self, frequency_hz: u64, isolation_code: u8) -> Result<()> {
        let socket = UdpSocket::bind(self.bind_addr).await?;
        debug!(
            addr = %self.bind_addr,
            frequency_hz,
            isolation_code,
            "UDP radio stand-in listening"
        );
        self.socket = Some(socket);
        Ok(())
    }

    async fn poll_frame(&mut self) -> Result<Option<RadioFrame>> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(BridgeError::RadioRead("radio not initialized".to_string()));
        };

        match socket.try_recv_from(&mut self.buf) {
            Ok((len, _peer)) => Ok(Some(RadioFrame {
                payload: Bytes::copy_from_slice(&self.buf[..len]),
                rssi: self.reported_rssi,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(BridgeError::RadioRead(e.to_string())),
        }
    }

    fn name(&self) -> &str {
        "UdpRadio"
    }
}

/// Scriptable in-memory radio for tests
#[derive(Debug, Default)]
pub struct MockRadio {
    frames: VecDeque<RadioFrame>,
    begun: Option<(u64, u8)>,
    fail_begins: u32,
}

impl MockRadio {
    /// Create an empty mock
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for the next poll
    pub fn push_frame(&mut self, payload: impl Into<Bytes>, rssi: i32) {
        self.frames.push_back(RadioFrame {
            payload: payload.into(),
            rssi,
        });
    }

    /// Make the next `n` begin calls fail
    pub fn fail_next_begins(&mut self, n: u32) {
        self.fail_begins = n;
    }

    /// Frequency and isolation code the mock was begun with
    pub fn begun_with(&self) -> Option<(u64, u8)> {
        self.begun
    }
}

#[async_trait]
impl RadioLink for MockRadio {
    async fn begin(&mut self, frequency_hz: u64, isolation_code: u8) -> Result<()> {
        if self.fail_begins > 0 {
            self.fail_begins -= 1;
            return Err(BridgeError::RadioRead("simulated begin failure".to_string()));
        }
        self.begun = Some((frequency_hz, isolation_code));
        Ok(())
    }

    async fn poll_frame(&mut self) -> Result<Option<RadioFrame>> {
        if self.begun.is_none() {
            return Err(BridgeError::RadioRead("radio not initialized".to_string()));
        }
        Ok(self.frames.pop_front())
    }

    fn name(&self) -> &str {
        "MockRadio"
    }
}
