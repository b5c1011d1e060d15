//! Stream Session Integration Tests
//!
//! Drives the real session task against a scripted transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;

use common::{Remote, eventually, fake};
use market_feed::infrastructure::websocket::{
    HeartbeatConfig, ReconnectConfig, SessionConfig, SessionHandle, StreamSession,
};
use market_feed::{ConnectionState, FrameHandler, Outbox};

const BACKOFF: Duration = Duration::from_millis(100);

fn config() -> SessionConfig {
    SessionConfig {
        heartbeat: HeartbeatConfig::new(Duration::from_secs(30), Duration::from_secs(60)),
        reconnect: ReconnectConfig::fixed(BACKOFF),
    }
}

/// Echoes every frame back with a prefix and counts disconnects.
struct Echo {
    disconnects: Arc<AtomicUsize>,
}

impl FrameHandler for Echo {
    fn on_frame(&mut self, frame: &str, outbox: &mut Outbox) {
        outbox.send(format!("echo:{frame}"));
    }

    fn on_disconnected(&mut self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

struct Running {
    handle: SessionHandle,
    remote: Remote,
    disconnects: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

fn start(config: SessionConfig) -> Running {
    let (transport, remote) = fake();
    let disconnects = Arc::new(AtomicUsize::new(0));
    let handler = Echo {
        disconnects: Arc::clone(&disconnects),
    };
    let (session, handle) = StreamSession::new(config, transport, handler, CancellationToken::new());
    Running {
        handle,
        remote,
        disconnects,
        task: session.spawn(),
    }
}

async fn connected(handle: &SessionHandle) {
    assert!(
        timeout(
            Duration::from_secs(2),
            handle.wait_for(ConnectionState::Connected)
        )
        .await
        .unwrap()
    );
}

#[tokio::test]
async fn connects_through_every_phase_in_order() {
    let run = start(config());
    connected(&run.handle).await;

    assert_eq!(
        run.remote.log(),
        vec!["resolve", "connect", "secure", "upgrade"]
    );
    run.handle.stop();
    timeout(Duration::from_secs(2), run.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn read_failure_reconnects_after_backoff() {
    let run = start(config());
    connected(&run.handle).await;

    let failed_at = Instant::now();
    run.remote.fail();

    assert!(eventually(|| run.disconnects.load(Ordering::SeqCst) == 1).await);
    assert!(eventually(|| run.remote.count("resolve") == 2).await);
    assert!(failed_at.elapsed() >= BACKOFF);
    connected(&run.handle).await;

    let log = run.remote.log();
    let reset = log.iter().position(|e| e == "reset").unwrap();
    let second_resolve = log.iter().rposition(|e| e == "resolve").unwrap();
    assert!(reset < second_resolve, "log: {log:?}");

    run.handle.stop();
    timeout(Duration::from_secs(2), run.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn sends_before_connect_flush_after_handshake() {
    let run = start(config());
    assert!(run.handle.send("first"));
    assert!(run.handle.send("second"));
    connected(&run.handle).await;

    assert!(eventually(|| run.remote.writes().len() == 2).await);
    assert_eq!(run.remote.writes(), vec!["first", "second"]);
    assert!(run.remote.position("upgrade").unwrap() < run.remote.position("write:first").unwrap());

    run.handle.stop();
    timeout(Duration::from_secs(2), run.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn handler_replies_are_written_in_order() {
    let run = start(config());
    connected(&run.handle).await;

    run.remote.frame("a");
    run.remote.frame("b");
    assert!(eventually(|| run.remote.writes().len() == 2).await);
    assert_eq!(run.remote.writes(), vec!["echo:a", "echo:b"]);

    run.handle.stop();
    timeout(Duration::from_secs(2), run.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_closes_and_never_reconnects() {
    let run = start(config());
    connected(&run.handle).await;

    run.handle.stop();
    run.handle.stop();
    timeout(Duration::from_secs(2), run.task).await.unwrap().unwrap();

    assert_eq!(run.remote.count("close"), 1);
    assert_eq!(run.remote.count("resolve"), 1);
    assert_eq!(run.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(run.handle.state(), ConnectionState::Disconnected);
    assert!(!run.handle.send("late"));
}

#[tokio::test]
async fn heartbeat_silence_triggers_reconnect() {
    let run = start(SessionConfig {
        heartbeat: HeartbeatConfig::new(Duration::from_millis(30), Duration::from_millis(60)),
        reconnect: ReconnectConfig::fixed(Duration::from_millis(20)),
    });
    connected(&run.handle).await;

    assert!(eventually(|| run.remote.count("ping") >= 1).await);
    assert!(eventually(|| run.remote.count("resolve") >= 2).await);
    assert!(run.disconnects.load(Ordering::SeqCst) >= 1);

    run.handle.stop();
    timeout(Duration::from_secs(2), run.task).await.unwrap().unwrap();
}
