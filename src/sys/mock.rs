//! Loopback transport for tests: records every write, serves reads from
//! staged responses.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use nusb::transfer::TransferError;

use crate::{Error, Result};
use super::Transport;

#[derive(Debug, Default)]
struct Inner {
    writes: Mutex<Vec<(u8, u16, u16)>>,
    staged: Mutex<HashMap<u8, VecDeque<Vec<u8>>>>,
    fallback: Mutex<HashMap<u8, Vec<u8>>>,
}

/// Clones share state, so a test can keep one clone and hand the other to
/// a device.
#[derive(Debug, Clone, Default)]
pub struct MockTransport(Arc<Inner>);

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    /// Stages a one-shot response for `request`; staged responses are served
    /// in order, before any fallback.
    pub fn stage_read(&self, request: u8, data: &[u8]) {
        self.0.staged.lock().unwrap()
            .entry(request).or_default().push_back(data.to_vec());
    }

    /// Serves `data` for every read of `request` with no staged response.
    pub fn read_returns(&self, request: u8, data: &[u8]) {
        self.0.fallback.lock().unwrap().insert(request, data.to_vec());
    }

    /// Every `(request, value, index)` written so far, in order.
    pub fn writes(&self) -> Vec<(u8, u16, u16)> {
        self.0.writes.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn write(&self, request: u8, value: u16, index: u16) -> Result<()> {
        self.0.writes.lock().unwrap().push((request, value, index));
        Ok(())
    }

    fn read(&self, request: u8, _value: u16, _index: u16, data: &mut [u8]) -> Result<()> {
        let response = self.0.staged.lock().unwrap()
            .get_mut(&request).and_then(|queue| queue.pop_front())
            .or_else(|| self.0.fallback.lock().unwrap().get(&request).cloned());
        match response {
            Some(bytes) if bytes.len() == data.len() => {
                data.copy_from_slice(&bytes);
                Ok(())
            }
            Some(bytes) =>
                Err(Error::Short { expected: data.len(), transferred: bytes.len() }),
            // an unstaged request reads like an endpoint stall
            None => Err(Error::Usb(TransferError::Stall)),
        }
    }
}
