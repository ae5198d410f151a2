//! End-to-end scenarios for a single call.

use crate::common::*;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Allocate → stage → reply → release
// ============================================================================

#[test]
fn reply_completes_call_and_release_unindexes() {
    let conn = manual_connection();
    let ctx = raw_call(&conn, b"ping", Duration::from_millis(500));
    assert_eq!(ctx.xid(), Xid(1));
    assert!(conn.is_live(Xid(1)));

    let mut guard = ctx.lock();
    guard.encode_call().unwrap();
    let before = conn.queue_len();
    guard.xfer_callmsg().unwrap();
    assert_eq!(conn.queue_len(), before + 1);
    drop(guard);

    // Transport side: send, then route the reply back
    let sent = conn.pop_outbound().unwrap();
    assert_eq!(sent.xid, Xid(1));
    assert_eq!(
        conn.deliver(RpcMsg::reply(sent.xid, b"pong".to_vec())),
        Delivery::Delivered { xid: Xid(1) }
    );

    let mut guard = ctx.lock();
    guard.wait_reply().unwrap();
    assert_eq!(guard.reply().unwrap().body, b"pong".to_vec());
    drop(guard);

    ctx.release();
    assert!(!conn.is_live(Xid(1)));
    assert_eq!(conn.live_calls(), 0);
}

#[test]
fn late_reply_after_release_is_unmatched() {
    let conn = manual_connection();
    let ctx = raw_call(&conn, b"", Duration::from_millis(20));
    let xid = ctx.xid();

    assert!(ctx.lock().wait_reply().unwrap_err().is_timeout());
    ctx.release();

    assert_eq!(
        conn.deliver(RpcMsg::reply(xid, vec![])),
        Delivery::NoMatchingCall { xid }
    );
    assert_eq!(conn.stats().inbound_unmatched, 1);
}

// ============================================================================
// Detached transport
// ============================================================================

#[test]
fn staging_while_detached_leaves_message_in_place() {
    let conn = detached_connection();
    let ctx = raw_call(&conn, b"payload", Duration::from_millis(500));

    let mut guard = ctx.lock();
    guard.encode_call().unwrap();
    let pending = guard.message().clone();

    assert_eq!(guard.xfer_callmsg().unwrap(), Staged::Retained);
    assert_eq!(conn.queue_len(), 0);
    assert_eq!(guard.message(), &pending, "buffer not replaced");
    assert_eq!(conn.stats().sends_retained, 1);
}

#[test]
fn staging_resumes_after_attach() {
    let conn = detached_connection();
    let ctx = raw_call(&conn, b"payload", Duration::from_millis(500));
    let mut guard = ctx.lock();
    guard.encode_call().unwrap();
    assert_eq!(guard.xfer_callmsg().unwrap(), Staged::Retained);

    conn.attach_transport(Arc::new(ManualTransport));
    assert_eq!(guard.xfer_callmsg().unwrap(), Staged::Queued { queue_len: 1 });
    assert_eq!(conn.pop_outbound().unwrap().body, b"payload".to_vec());
}

#[test]
fn inbound_while_detached_is_dropped() {
    let conn = manual_connection();
    let ctx = raw_call(&conn, b"", Duration::from_millis(30));
    conn.detach_transport();

    assert_eq!(
        conn.deliver(RpcMsg::reply(ctx.xid(), vec![])),
        Delivery::Detached
    );
    assert!(ctx.lock().wait_reply().unwrap_err().is_timeout());
    assert_eq!(conn.stats().inbound_dropped, 1);
}

// ============================================================================
// Timeout bound
// ============================================================================

#[test]
fn timeout_is_bounded_under_spurious_wakeups() {
    let conn = manual_connection();
    let timeout = Duration::from_millis(50);
    let ctx = raw_call(&conn, b"", timeout);
    let xid = ctx.xid();

    let poker = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || {
            let stop = Instant::now() + Duration::from_millis(400);
            let mut pokes = 0;
            while Instant::now() < stop && conn.poke(xid) {
                pokes += 1;
                thread::sleep(Duration::from_millis(2));
            }
            pokes
        })
    };

    let start = Instant::now();
    let err = ctx.lock().wait_reply().unwrap_err();
    let waited = start.elapsed();

    assert!(err.is_timeout());
    assert!(waited >= timeout);
    assert!(
        waited < timeout * 5,
        "wait took {:?} with a {:?} timeout",
        waited,
        timeout
    );

    ctx.release();
    assert!(poker.join().unwrap() > 0, "waiter was actually poked");
}

#[test]
fn timeout_then_retry_with_fresh_context() {
    let conn = manual_connection();
    let first = raw_call(&conn, b"", Duration::from_millis(10));
    assert!(first.lock().wait_reply().is_err());
    first.release();

    let second = raw_call(&conn, b"", Duration::from_millis(500));
    assert_eq!(second.xid(), Xid(2));
    conn.deliver(RpcMsg::reply(Xid(2), vec![]));
    second.lock().wait_reply().unwrap();
}

// ============================================================================
// Abort
// ============================================================================

#[test]
fn abort_wakes_blocked_waiter() {
    let conn = manual_connection();
    let ctx = raw_call(&conn, b"", Duration::from_secs(10));

    let aborter = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            conn.abort_calls("transport closed")
        })
    };

    let start = Instant::now();
    let err = ctx.lock().wait_reply().unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(matches!(err, callmux_core::Error::Aborted { .. }));
    assert_eq!(aborter.join().unwrap(), 1);
    assert!(conn.is_live(ctx.xid()), "aborted calls stay until released");
}


// ============================================================================
// Transport answering on the staging thread
// ============================================================================

#[test]
fn inline_transport_answers_from_notify_hook() {
    let conn = loopback_connection();
    let client = Client::new(Arc::clone(&conn));
    let (tx, rx) = mpsc::channel();

    let worker = thread::spawn(move || {
        let results = Arc::new(RawResults::new());
        let outcome = client.call(
            ProcId(1),
            Arc::new(b"inline".to_vec()),
            results.clone(),
            Some(Duration::from_millis(200)),
        );
        let _ = tx.send((outcome, results.take()));
    });

    let (outcome, body) = rx
        .recv_timeout(Duration::from_secs(3))
        .expect("call returned");
    outcome.unwrap();
    assert_eq!(body, Some(b"inline".to_vec()));
    worker.join().unwrap();

    assert_eq!(conn.live_calls(), 0);
    assert_eq!(conn.stats().replies_delivered, 1);
}

#[test]
fn inline_transport_answers_when_guard_drops() {
    let conn = loopback_connection();
    let ctx = raw_call(&conn, b"deferred", Duration::from_millis(200));
    {
        let mut guard = ctx.lock();
        guard.encode_call().unwrap();
        guard.xfer_callmsg().unwrap();
        assert_eq!(conn.stats().replies_delivered, 0, "hook waits for the lock release");
    }
    assert_eq!(conn.stats().replies_delivered, 1);

    let mut guard = ctx.lock();
    guard.wait_reply().unwrap();
    assert_eq!(guard.reply().unwrap().body, b"deferred".to_vec());
}
