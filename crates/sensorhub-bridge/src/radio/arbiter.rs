//! Radio arbiter
//!
//! Single mutual-exclusion point around the radio. Only a guard holder may
//! transmit or change receive state, acquisition always carries a timeout
//! so neither pipeline can block indefinitely, and the transmit helper
//! leaves the radio back in continuous receive on every exit path. This is
//! the only lock in the radio subsystem; there is no nested locking and
//! therefore no ordering concern.

use super::Radio;
use crate::error::{BridgeError, Result};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Pause between TX completion and the receive restart; lets the PA settle
const POST_TX_PAUSE: Duration = Duration::from_millis(10);

/// BUSY-line deadline ahead of a transmit
const BUSY_CLEAR_TIMEOUT: Duration = Duration::from_secs(1);

/// Exclusive owner of the radio device
pub struct RadioArbiter {
    radio: Mutex<Radio>,
    default_timeout: Duration,
}

impl RadioArbiter {
    /// Wrap a radio with the given default acquisition timeout
    pub fn new(radio: Radio, default_timeout: Duration) -> Self {
        Self {
            radio: Mutex::new(radio),
            default_timeout,
        }
    }

    /// Acquire the radio with the default timeout
    pub async fn acquire(&self) -> Result<MutexGuard<'_, Radio>> {
        self.acquire_timeout(self.default_timeout).await
    }

    /// Acquire the radio, waiting at most `timeout`
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<MutexGuard<'_, Radio>> {
        tokio::time::timeout(timeout, self.radio.lock())
            .await
            .map_err(|_| BridgeError::RadioBusy {
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    /// Transmit a frame and restore continuous receive
    ///
    /// The full downlink sequence: acquire, standby, wait for BUSY to
    /// clear, transmit, pause, restart receive, release. Every failure
    /// path still restarts receive before the error is returned.
    pub async fn transmit_frame(&self, frame: &[u8]) -> Result<()> {
        let mut radio = self.acquire().await?;

        radio.standby().await?;

        if let Err(e) = radio.wait_busy_clear(BUSY_CLEAR_TIMEOUT).await {
            warn!(error = %e, "BUSY line held, aborting transmit");
            if let Err(rx_err) = radio.start_receive().await {
                warn!(error = %rx_err, "failed to restart receive after busy abort");
            }
            return Err(e);
        }

        let result = radio.transmit(frame).await;

        tokio::time::sleep(POST_TX_PAUSE).await;
        if let Err(rx_err) = radio.start_receive().await {
            warn!(error = %rx_err, "failed to restart receive after transmit");
        } else {
            debug!(bytes = frame.len(), ok = result.is_ok(), "transmit complete, receive restored");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{MockRadio, RadioState};

    async fn arbiter() -> (RadioArbiter, crate::radio::MockRadioHandle) {
        let (driver, handle) = MockRadio::new();
        let mut radio = Radio::new(Box::new(driver));
        radio.init().await.unwrap();
        (RadioArbiter::new(radio, Duration::from_millis(100)), handle)
    }

    #[tokio::test]
    async fn transmit_restores_receive() {
        let (arb, handle) = arbiter().await;
        arb.transmit_frame(&[0xDE, 0xAD]).await.unwrap();

        assert_eq!(handle.transmitted(), vec![vec![0xDE, 0xAD]]);
        let radio = arb.acquire().await.unwrap();
        assert_eq!(radio.state(), RadioState::Receiving);
    }

    #[tokio::test]
    async fn failed_transmit_still_restores_receive() {
        let (arb, handle) = arbiter().await;
        handle.fail_next_transmits(1);

        assert!(arb.transmit_frame(&[0x01]).await.is_err());
        assert!(handle.transmitted().is_empty());

        let radio = arb.acquire().await.unwrap();
        assert_eq!(radio.state(), RadioState::Receiving);
    }

    #[tokio::test]
    async fn busy_line_aborts_and_restores_receive() {
        let (arb, handle) = arbiter().await;
        handle.hold_busy(true);

        let err = arb.transmit_frame(&[0x01]).await.unwrap_err();
        assert!(matches!(err, BridgeError::RadioNotReady { .. }));
        assert!(handle.transmitted().is_empty());

        let radio = arb.acquire().await.unwrap();
        assert_eq!(radio.state(), RadioState::Receiving);
    }

    #[tokio::test]
    async fn acquisition_times_out_while_held() {
        let (arb, _handle) = arbiter().await;
        let _guard = arb.acquire().await.unwrap();

        let err = arb
            .acquire_timeout(Duration::from_millis(10))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, BridgeError::RadioBusy { timeout_ms: 10 }));
    }

    #[tokio::test]
    async fn no_two_transmits_overlap() {
        use std::sync::Arc;
        let (arb, handle) = arbiter().await;
        let arb = Arc::new(arb);

        let mut tasks = Vec::new();
        for i in 0..4u8 {
            let arb = arb.clone();
            tasks.push(tokio::spawn(async move {
                arb.transmit_frame(&[i]).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        // all four frames made it out, one at a time
        let mut sent: Vec<u8> = handle.transmitted().iter().map(|f| f[0]).collect();
        sent.sort_unstable();
        assert_eq!(sent, vec![0, 1, 2, 3]);
    }
}
