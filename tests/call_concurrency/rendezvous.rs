//! Sender/receiver rendezvous under real parallelism.

use crate::common::*;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn many_callers_share_one_receiver() {
    const CALLERS: usize = 8;
    const CALLS: usize = 50;

    let (conn, _server) = EchoServer::start(ConnectionConfig::deterministic(), Box::new(echo));
    let client = Client::new(conn.clone());

    let handles: Vec<_> = (0..CALLERS)
        .map(|caller| {
            let client = client.clone();
            thread::spawn(move || {
                for n in 0..CALLS {
                    let body = format!("{}:{}", caller, n).into_bytes();
                    let results = Arc::new(RawResults::new());
                    client
                        .call(
                            ProcId(1),
                            Arc::new(body.clone()),
                            results.clone(),
                            Some(Duration::from_secs(5)),
                        )
                        .unwrap();
                    assert_eq!(results.take(), Some(body), "reply routed to the wrong call");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(conn.live_calls(), 0);
    assert_eq!(conn.stats().replies_delivered, (CALLERS * CALLS) as u64);
}

#[test]
fn reply_racing_the_wait_is_never_lost() {
    let conn = manual_connection();
    let mut rng = rand::thread_rng();

    for _ in 0..200 {
        let ctx = raw_call(&conn, b"", Duration::from_secs(5));
        let xid = ctx.xid();
        let delay = Duration::from_micros(rng.gen_range(0..500));

        let receiver = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                thread::sleep(delay);
                conn.deliver(RpcMsg::reply(xid, vec![]))
            })
        };

        let start = Instant::now();
        ctx.lock().wait_reply().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(receiver.join().unwrap(), Delivery::Delivered { xid });
        ctx.release();
    }
}

#[test]
fn replies_out_of_order_reach_their_callers() {
    let conn = manual_connection();
    let calls: Vec<_> = (0..16)
        .map(|i| raw_call(&conn, &[i as u8], Duration::from_secs(5)))
        .collect();
    let xids: Vec<Xid> = calls.iter().map(|c| c.xid()).collect();

    let completed = Arc::new(AtomicUsize::new(0));
    let waiters: Vec<_> = calls
        .into_iter()
        .map(|ctx| {
            let completed = Arc::clone(&completed);
            thread::spawn(move || {
                let mut guard = ctx.lock();
                guard.wait_reply().unwrap();
                let body = guard.reply().unwrap().body.clone();
                assert_eq!(body, vec![guard.xid().0 as u8]);
                drop(guard);
                ctx.release();
                completed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    // Answer newest first
    for xid in xids.iter().rev() {
        conn.deliver(RpcMsg::reply(*xid, vec![xid.0 as u8]));
    }

    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 16);
    assert_eq!(conn.live_calls(), 0);
}

#[test]
fn waiters_do_not_block_the_connection() {
    let conn = manual_connection();
    let blocked = raw_call(&conn, b"", Duration::from_secs(10));
    let blocked_xid = blocked.xid();

    let waiter = thread::spawn(move || {
        let err = blocked.lock().wait_reply().unwrap_err();
        (blocked, err)
    });

    // While one call waits, others allocate, stage and complete freely
    thread::sleep(Duration::from_millis(20));
    let start = Instant::now();
    for _ in 0..100 {
        let ctx = raw_call(&conn, b"x", Duration::from_secs(1));
        {
            let mut guard = ctx.lock();
            guard.encode_call().unwrap();
            guard.xfer_callmsg().unwrap();
        }
        conn.deliver(RpcMsg::reply(ctx.xid(), vec![]));
        ctx.lock().wait_reply().unwrap();
        ctx.release();
    }
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(conn.drain_outbound().len(), 100);

    assert_eq!(conn.abort_calls("test over"), 1);
    let (blocked, err) = waiter.join().unwrap();
    assert!(matches!(err, callmux_core::Error::Aborted { .. }));
    assert_eq!(blocked.xid(), blocked_xid);
}
