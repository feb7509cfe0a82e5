//! Radio device abstraction
//!
//! The physical driver lives outside this crate; the bridge talks to it
//! through [`RadioInterface`] so the pipelines can be exercised against the
//! loopback implementation in [`mock`]. The [`Radio`] wrapper pins every
//! driver call to an explicit state machine instead of letting call sites
//! sprinkle standby/receive transitions:
//!
//! ```text
//!   INIT ──init()──> STANDBY ──start_receive()──> RX
//!   RX ──standby()──> STANDBY ──transmit()──> TX ──(complete)──> STANDBY
//!   any error ──> STANDBY (retry allowed)
//! ```
//!
//! The radio runs continuously; there is no terminal state.

pub mod arbiter;
pub mod mock;

pub use arbiter::RadioArbiter;
pub use mock::{MockRadio, MockRadioHandle};

use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::warn;

/// A raw reception from the driver
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    /// Frame bytes as read from the radio FIFO
    pub bytes: Bytes,
    /// RSSI in dBm
    pub rssi: i16,
    /// SNR in dB
    pub snr: i8,
}

/// Contract with the physical radio driver
///
/// Implementations own the SPI/register plumbing; callers own sequencing,
/// which the [`Radio`] wrapper enforces. All methods are driver-level and
/// may fail with [`BridgeError::Radio`].
#[async_trait]
pub trait RadioInterface: Send {
    /// Bring the hardware up into standby
    async fn init(&mut self) -> Result<()>;

    /// Enter continuous receive mode
    async fn start_receive(&mut self) -> Result<()>;

    /// Enter standby
    async fn standby(&mut self) -> Result<()>;

    /// Whether a received frame is waiting in the FIFO
    async fn data_ready(&mut self) -> Result<bool>;

    /// Read the pending frame; `None` when the interrupt was spurious.
    /// Reading leaves the hardware in standby.
    async fn read_frame(&mut self) -> Result<Option<ReceivedFrame>>;

    /// Transmit a frame, blocking until TX completes
    async fn transmit(&mut self, frame: &[u8]) -> Result<()>;

    /// Wait for the BUSY line to clear before a state change
    async fn wait_busy_clear(&mut self, timeout: Duration) -> Result<()>;

    /// Driver name for logging
    fn name(&self) -> &str;
}

/// Externally observable radio state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    /// Hardware not yet initialized
    Init,
    /// Idle, ready for a state change
    Standby,
    /// Continuous receive
    Receiving,
    /// Transmission in progress
    Transmitting,
}

impl RadioState {
    /// State name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioState::Init => "init",
            RadioState::Standby => "standby",
            RadioState::Receiving => "rx",
            RadioState::Transmitting => "tx",
        }
    }
}

/// Driver wrapper enforcing the radio state machine
pub struct Radio {
    driver: Box<dyn RadioInterface>,
    state: RadioState,
}

impl Radio {
    /// Wrap an uninitialized driver
    pub fn new(driver: Box<dyn RadioInterface>) -> Self {
        Self {
            driver,
            state: RadioState::Init,
        }
    }

    /// Current state
    pub fn state(&self) -> RadioState {
        self.state
    }

    /// Driver name for logging
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Bring the hardware up and enter continuous receive
    pub async fn init(&mut self) -> Result<()> {
        self.driver.init().await?;
        self.state = RadioState::Standby;
        self.start_receive().await
    }

    /// Enter continuous receive mode
    pub async fn start_receive(&mut self) -> Result<()> {
        if self.state == RadioState::Init {
            return Err(BridgeError::RadioState {
                from: self.state.as_str(),
                attempted: "start_receive",
            });
        }
        match self.driver.start_receive().await {
            Ok(()) => {
                self.state = RadioState::Receiving;
                Ok(())
            }
            Err(e) => {
                self.state = RadioState::Standby;
                Err(e)
            }
        }
    }

    /// Enter standby
    pub async fn standby(&mut self) -> Result<()> {
        if self.state == RadioState::Init {
            return Err(BridgeError::RadioState {
                from: self.state.as_str(),
                attempted: "standby",
            });
        }
        self.driver.standby().await?;
        self.state = RadioState::Standby;
        Ok(())
    }

    /// Whether a frame is waiting
    pub async fn data_ready(&mut self) -> Result<bool> {
        self.driver.data_ready().await
    }

    /// Read the pending frame; the hardware drops to standby afterwards
    pub async fn read_frame(&mut self) -> Result<Option<ReceivedFrame>> {
        if self.state != RadioState::Receiving {
            return Err(BridgeError::RadioState {
                from: self.state.as_str(),
                attempted: "read_frame",
            });
        }
        match self.driver.read_frame().await {
            Ok(frame) => {
                self.state = RadioState::Standby;
                Ok(frame)
            }
            Err(e) => {
                self.state = RadioState::Standby;
                Err(e)
            }
        }
    }

    /// Wait for the BUSY line to clear
    pub async fn wait_busy_clear(&mut self, timeout: Duration) -> Result<()> {
        self.driver.wait_busy_clear(timeout).await
    }

    /// Transmit from standby; the radio returns to standby on completion
    /// or on error
    pub async fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        if self.state != RadioState::Standby {
            return Err(BridgeError::RadioState {
                from: self.state.as_str(),
                attempted: "transmit",
            });
        }
        self.state = RadioState::Transmitting;
        let result = self.driver.transmit(frame).await;
        self.state = RadioState::Standby;
        if let Err(ref e) = result {
            warn!(radio = self.name(), error = %e, "transmit failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_lands_in_receive() {
        let (driver, _handle) = MockRadio::new();
        let mut radio = Radio::new(Box::new(driver));
        assert_eq!(radio.state(), RadioState::Init);
        radio.init().await.unwrap();
        assert_eq!(radio.state(), RadioState::Receiving);
    }

    #[tokio::test]
    async fn transmit_requires_standby() {
        let (driver, _handle) = MockRadio::new();
        let mut radio = Radio::new(Box::new(driver));
        radio.init().await.unwrap();

        // still receiving
        let err = radio.transmit(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, BridgeError::RadioState { .. }));

        radio.standby().await.unwrap();
        radio.transmit(&[1, 2, 3]).await.unwrap();
        assert_eq!(radio.state(), RadioState::Standby);
    }

    #[tokio::test]
    async fn read_frame_drops_to_standby() {
        let (driver, handle) = MockRadio::new();
        handle.inject(vec![0xAA], -90, 4);
        let mut radio = Radio::new(Box::new(driver));
        radio.init().await.unwrap();

        let frame = radio.read_frame().await.unwrap().unwrap();
        assert_eq!(&frame.bytes[..], &[0xAA]);
        assert_eq!(radio.state(), RadioState::Standby);
    }

    #[tokio::test]
    async fn failed_transmit_returns_to_standby() {
        let (driver, handle) = MockRadio::new();
        handle.fail_next_transmits(1);
        let mut radio = Radio::new(Box::new(driver));
        radio.init().await.unwrap();
        radio.standby().await.unwrap();

        assert!(radio.transmit(&[0x01]).await.is_err());
        assert_eq!(radio.state(), RadioState::Standby);

        // retry allowed after error
        radio.transmit(&[0x01]).await.unwrap();
    }

    #[tokio::test]
    async fn uninitialized_radio_rejects_operations() {
        let (driver, _handle) = MockRadio::new();
        let mut radio = Radio::new(Box::new(driver));
        assert!(radio.start_receive().await.is_err());
        assert!(radio.standby().await.is_err());
    }
}
