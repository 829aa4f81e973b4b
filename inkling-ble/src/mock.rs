//! Scripted in-memory transport for tests.
//!
//! `MockTransport` answers scans from a fixed advertisement list and hands
//! out `MockLink`s that record writes and auto-reply with queued
//! notification frames. Failure injection covers the interesting paths:
//! scans that find nothing, scans that cannot run at all, and links that
//! refuse to come up. Exposed publicly so downstream consumers can test
//! against the same double this crate uses.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::transport::{Advertisement, Link, Transport};

#[derive(Default)]
struct State {
    advertisements: Mutex<Vec<Advertisement>>,
    /// Scans that complete but hear nothing, consumed first.
    empty_scans: AtomicU32,
    /// Scans that fail outright, consumed before `empty_scans`.
    failing_scans: AtomicU32,
    /// Link attempts refused before one succeeds.
    failing_links: AtomicU32,
    scan_calls: AtomicU32,
    link_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    unsubscribe_calls: AtomicU32,
    writes: Mutex<Vec<Vec<u8>>>,
    /// One entry per upcoming write; `Some` frames are delivered as the
    /// notification answering that write, `None` writes go unanswered.
    replies: Mutex<VecDeque<Option<Vec<u8>>>>,
    subscriber: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<State>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an advertisement returned by every successful scan.
    pub fn advertise(&self, advertisement: Advertisement) {
        self.state
            .advertisements
            .lock()
            .unwrap()
            .push(advertisement);
    }

    /// Make the next `count` scans complete without hearing the device.
    pub fn miss_scans(&self, count: u32) {
        self.state.empty_scans.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` scans fail outright (no adapter).
    pub fn fail_scans(&self, count: u32) {
        self.state.failing_scans.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` link attempts fail.
    pub fn fail_links(&self, count: u32) {
        self.state.failing_links.store(count, Ordering::SeqCst);
    }

    /// Queue the notification frame answering the next unanswered write.
    pub fn reply_with(&self, frame: &[u8]) {
        self.state
            .replies
            .lock()
            .unwrap()
            .push_back(Some(frame.to_vec()));
    }

    /// Queue a write that gets no notification in response.
    pub fn reply_silence(&self) {
        self.state.replies.lock().unwrap().push_back(None);
    }

    /// Deliver a notification right now, tied to no write — the stale
    /// value the pre-write drain must discard.
    pub fn push_notification(&self, frame: &[u8]) {
        if let Some(tx) = self.state.subscriber.lock().unwrap().as_ref() {
            let _ = tx.try_send(frame.to_vec());
        }
    }

    pub fn scan_calls(&self) -> u32 {
        self.state.scan_calls.load(Ordering::SeqCst)
    }

    pub fn link_calls(&self) -> u32 {
        self.state.link_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.state.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> u32 {
        self.state.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.writes.lock().unwrap().clone()
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Build an advertisement carrying one manufacturer-data entry.
pub fn advertisement(
    address: Address,
    local_name: Option<&str>,
    manufacturer_id: u16,
    data: &[u8],
    rssi: Option<i16>,
) -> Advertisement {
    let mut manufacturer_data = HashMap::new();
    manufacturer_data.insert(manufacturer_id, data.to_vec());
    Advertisement {
        address,
        local_name: local_name.map(str::to_string),
        manufacturer_data,
        rssi,
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn scan(&self, _timeout: Duration) -> Result<Vec<Advertisement>> {
        self.state.scan_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.state.failing_scans) {
            return Err(Error::Discovery("mock adapter unavailable".into()));
        }
        if Self::take(&self.state.empty_scans) {
            return Ok(Vec::new());
        }
        Ok(self.state.advertisements.lock().unwrap().clone())
    }

    async fn open_link(
        &self,
        address: Address,
        _service: Uuid,
        _timeout: Duration,
    ) -> Result<Box<dyn Link>> {
        self.state.link_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.state.failing_links) {
            return Err(Error::Transport(format!("mock link to {address} refused")));
        }
        Ok(Box::new(MockLink {
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct MockLink {
    state: Arc<State>,
}

#[async_trait]
impl Link for MockLink {
    async fn write(&mut self, payload: &[u8]) -> Result<()> {
        self.state.writes.lock().unwrap().push(payload.to_vec());
        let reply = self.state.replies.lock().unwrap().pop_front().flatten();
        if let Some(frame) = reply {
            if let Some(tx) = self.state.subscriber.lock().unwrap().as_ref() {
                let _ = tx.try_send(frame);
            }
        }
        Ok(())
    }

    async fn subscribe(&mut self, notify_tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        *self.state.subscriber.lock().unwrap() = Some(notify_tx);
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.state.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.subscriber.lock().unwrap() = None;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
