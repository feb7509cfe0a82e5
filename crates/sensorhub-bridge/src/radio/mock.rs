//! Loopback radio driver
//!
//! Stands in for the hardware driver on the bench and in tests: frames are
//! injected and inspected through a [`MockRadioHandle`], transmit failures
//! and a stuck BUSY line can be scripted.

use super::{RadioInterface, ReceivedFrame};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Shared {
    incoming: Mutex<VecDeque<ReceivedFrame>>,
    transmitted: Mutex<Vec<Vec<u8>>>,
    fail_transmits: AtomicUsize,
    busy_held: AtomicBool,
}

/// In-memory radio driver
pub struct MockRadio {
    shared: Arc<Shared>,
}

/// Test-side handle to a [`MockRadio`]
#[derive(Clone)]
pub struct MockRadioHandle {
    shared: Arc<Shared>,
}

impl MockRadio {
    /// Create a driver and its controlling handle
    pub fn new() -> (Self, MockRadioHandle) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: shared.clone(),
            },
            MockRadioHandle { shared },
        )
    }
}

impl MockRadioHandle {
    /// Queue a frame for the driver to receive
    pub fn inject(&self, bytes: Vec<u8>, rssi: i16, snr: i8) {
        self.shared.incoming.lock().unwrap().push_back(ReceivedFrame {
            bytes: Bytes::from(bytes),
            rssi,
            snr,
        });
    }

    /// Everything the driver has transmitted so far
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.shared.transmitted.lock().unwrap().clone()
    }

    /// Make the next `n` transmit calls fail
    pub fn fail_next_transmits(&self, n: usize) {
        self.shared.fail_transmits.store(n, Ordering::SeqCst);
    }

    /// Hold or release the BUSY line
    pub fn hold_busy(&self, held: bool) {
        self.shared.busy_held.store(held, Ordering::SeqCst);
    }
}

#[async_trait]
impl RadioInterface for MockRadio {
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn start_receive(&mut self) -> Result<()> {
        Ok(())
    }

    async fn standby(&mut self) -> Result<()> {
        Ok(())
    }

    async fn data_ready(&mut self) -> Result<bool> {
        Ok(!self.shared.incoming.lock().unwrap().is_empty())
    }

    async fn read_frame(&mut self) -> Result<Option<ReceivedFrame>> {
        Ok(self.shared.incoming.lock().unwrap().pop_front())
    }

    async fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        let pending = self.shared.fail_transmits.load(Ordering::SeqCst);
        if pending > 0 {
            self.shared.fail_transmits.store(pending - 1, Ordering::SeqCst);
            return Err(BridgeError::Radio("scripted transmit failure".to_string()));
        }
        self.shared.transmitted.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    async fn wait_busy_clear(&mut self, timeout: Duration) -> Result<()> {
        if self.shared.busy_held.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Err(BridgeError::RadioNotReady {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
