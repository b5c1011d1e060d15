//! Scripted transport shared by the session and feed tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use market_feed::{Inbound, Transport, TransportError};

type Scripted = Result<Inbound, TransportError>;

/// Transport whose every connection step succeeds and whose reads come
/// from the paired [`Remote`].
pub struct FakeTransport {
    log: Arc<Mutex<Vec<String>>>,
    inbound: mpsc::UnboundedReceiver<Scripted>,
}

/// Test-side end of a [`FakeTransport`].
#[derive(Clone)]
pub struct Remote {
    log: Arc<Mutex<Vec<String>>>,
    inbound: mpsc::UnboundedSender<Scripted>,
}

pub fn fake() -> (FakeTransport, Remote) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        FakeTransport {
            log: Arc::clone(&log),
            inbound: rx,
        },
        Remote { log, inbound: tx },
    )
}

impl FakeTransport {
    fn record(&self, entry: impl Into<String>) {
        self.log.lock().push(entry.into());
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn resolve(&mut self) -> Result<(), TransportError> {
        self.record("resolve");
        Ok(())
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.record("connect");
        Ok(())
    }

    async fn secure(&mut self) -> Result<(), TransportError> {
        self.record("secure");
        Ok(())
    }

    async fn upgrade(&mut self) -> Result<(), TransportError> {
        self.record("upgrade");
        Ok(())
    }

    async fn read(&mut self) -> Result<Inbound, TransportError> {
        match self.inbound.recv().await {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }

    async fn write(&mut self, payload: &str) -> Result<(), TransportError> {
        self.record(format!("write:{payload}"));
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.record("ping");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.record("close");
        Ok(())
    }

    fn reset(&mut self) {
        self.record("reset");
    }
}

impl Remote {
    /// Deliver a text frame on the current connection.
    pub fn frame(&self, text: &str) {
        self.inbound.send(Ok(Inbound::Text(text.to_string()))).unwrap();
    }

    /// Fail the next read.
    pub fn fail(&self) {
        self.inbound
            .send(Err(TransportError::Io("connection reset by peer".to_string())))
            .unwrap();
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.log.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log.lock().iter().position(|e| e == entry)
    }

    /// Payloads written so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix("write:").map(str::to_string))
            .collect()
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
