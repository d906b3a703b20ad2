//! End-to-end runs of the completion pipeline on the software device.

use std::collections::HashSet;
use std::io;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use cordma::ctrl::{Connector, QpHandshake};
use cordma::prelude::*;
use cordma::soft::{Fabric, QpBuilder, SoftCq, SoftMr, SoftNic};
use futures::executor::block_on;

struct Rig {
    nic: SoftNic,
    cq: SoftCq,
    exec: Arc<Executor>,
    poller: CqPoller,
}

impl Rig {
    fn new() -> Result<Self> {
        Self::with_depth(Cq::DEFAULT_CQ_DEPTH)
    }

    fn with_depth(depth: u32) -> Result<Self> {
        let nic = Fabric::new().open_nic();
        let cq = nic.create_cq(depth)?;
        let exec = Arc::new(Executor::new(4)?);
        let poller = CqPoller::spawn(cq.cq().clone(), exec.clone())?;
        Ok(Self {
            nic,
            cq,
            exec,
            poller,
        })
    }

    fn builder(&self) -> QpBuilder {
        QpBuilder::new(&self.nic).send_cq(&self.cq).recv_cq(&self.cq)
    }

    fn qp(&self) -> Result<Qp> {
        Ok(Qp::new(Arc::new(self.builder().build()?), self.exec.clone()))
    }

    fn pair(&self) -> Result<(Qp, Qp)> {
        let (mut a, mut b) = (self.qp()?, self.qp()?);
        Connector::connect_local(&mut a, &mut b)?;
        Ok((a, b))
    }

    fn mr(&self, len: usize) -> SoftMr {
        self.nic.reg_mr(len).unwrap()
    }
}

fn status_of<T: std::fmt::Debug>(res: cordma::Result<T>) -> WcStatus {
    match res {
        Err(e) => e.wc_status().expect("expected a completion error"),
        Ok(v) => panic!("expected failure, got {:?}", v),
    }
}

#[test]
fn send_handler_runs_once_with_byte_count() -> Result<()> {
    let rig = Rig::new()?;
    let (a, b) = rig.pair()?;
    let src = rig.mr(64);
    let dst = rig.mr(64);

    let _recv = b.recv(&[dst.as_slice()])?;
    let (tx, rx) = mpsc::channel();
    let wr_id = a.post_send_with(&[src.as_slice()], SendOp::Send { imm: None }, move |wc| {
        tx.send(wc).unwrap();
    })?;

    let wc = rx.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(wc.wr_id(), wr_id);
    assert_eq!(wc.ok(), Ok(64));
    assert_eq!(wc.opcode(), WcOpcode::Send);
    // The handler was consumed with its completion.
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    Ok(())
}

#[test]
fn dispatcher_invokes_bound_callback_for_injected_completion() -> Result<()> {
    let exec = Executor::new(2)?;
    let (tx, rx) = mpsc::channel();
    let id = exec.register(move |wc| tx.send(wc.ok()).unwrap());
    exec.process_wc(Wc::new(id, WcStatus::Success, WcOpcode::Send, 64))?;

    assert_eq!(rx.recv_timeout(Duration::from_secs(5))?, Ok(64));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    Ok(())
}

#[test]
fn send_and_recv_with_imm() -> Result<()> {
    let rig = Rig::new()?;
    let (a, b) = rig.pair()?;
    let src = rig.mr(128);
    let dst = rig.mr(256);
    src.with_bytes_mut(|b| b.iter_mut().enumerate().for_each(|(i, x)| *x = i as u8));

    let recv = b.recv(&[dst.slice(0, 100).unwrap(), dst.slice(100, 156).unwrap()])?;
    let sent = block_on(a.send_with_imm(&[src.as_slice()], 0xfeed)?)?;
    let got = block_on(recv)?;

    assert_eq!(sent, 128);
    assert_eq!(got, RecvCompletion { len: 128, imm: Some(0xfeed) });
    assert_eq!(dst.to_vec()[..128], src.to_vec()[..]);
    Ok(())
}

#[test]
fn send_waits_for_late_recv() -> Result<()> {
    let rig = Rig::new()?;
    let (a, b) = rig.pair()?;
    let src = rig.mr(16);
    let dst = rig.mr(16);
    src.with_bytes_mut(|b| b.fill(9));

    let send = a.send(&[src.as_slice()])?;
    thread::sleep(Duration::from_millis(20));
    let recv = b.recv(&[dst.as_slice()])?;

    assert_eq!(block_on(recv)?.len, 16);
    assert_eq!(block_on(send)?, 16);
    assert_eq!(dst.to_vec(), vec![9; 16]);
    Ok(())
}

#[test]
fn one_sided_verbs() -> Result<()> {
    let rig = Rig::new()?;
    let (a, b) = rig.pair()?;
    let local = rig.mr(64);
    let remote_mr = rig.mr(64);
    let remote = remote_mr.as_remote();

    local.with_bytes_mut(|b| b[..32].fill(0x5a));
    assert_eq!(block_on(a.write(&[local.slice(0, 32).unwrap()], &remote)?)?, 32);
    assert_eq!(remote_mr.to_vec()[..32], [0x5a; 32]);

    assert_eq!(
        block_on(b.read(&[local.slice(32, 16).unwrap()], &remote.slice(8, 16).unwrap())?)?,
        16
    );
    assert_eq!(local.to_vec()[32..48], [0x5a; 16]);

    let word = remote.slice(48, 8).unwrap();
    let fetched = local.slice(56, 8).unwrap();
    remote_mr.with_bytes_mut(|b| b[48..56].copy_from_slice(&10u64.to_ne_bytes()));

    assert_eq!(block_on(a.fetch_add(fetched, &word, 5)?)?, 8);
    assert_eq!(local.read_u64(56), 10);
    assert_eq!(remote_mr.read_u64(48), 15);

    block_on(a.compare_swap(fetched, &word, 15, 100)?)?;
    assert_eq!(local.read_u64(56), 15);
    assert_eq!(remote_mr.read_u64(48), 100);

    // Compare fails: value untouched, original still returned.
    block_on(a.compare_swap(fetched, &word, 15, 7)?)?;
    assert_eq!(local.read_u64(56), 100);
    assert_eq!(remote_mr.read_u64(48), 100);
    Ok(())
}

#[test]
fn write_with_imm_consumes_recv() -> Result<()> {
    let rig = Rig::new()?;
    let (a, b) = rig.pair()?;
    let src = rig.mr(32);
    let dst = rig.mr(32);
    let notify = rig.mr(8);

    let recv = b.recv(&[notify.as_slice()])?;
    block_on(a.write_with_imm(&[src.as_slice()], &dst.as_remote(), 77)?)?;
    let got = block_on(recv)?;
    assert_eq!(got, RecvCompletion { len: 32, imm: Some(77) });
    Ok(())
}

#[test]
fn bad_rkey_fails_exactly_the_waiting_future() -> Result<()> {
    let rig = Rig::new()?;
    let (a, b) = rig.pair()?;
    let local = rig.mr(64);
    let target = rig.mr(64);

    // Completes normally before the failure.
    let good = a.write(&[local.slice(0, 8).unwrap()], &target.as_remote())?;
    let pending_recv = a.recv(&[local.slice(8, 8).unwrap()])?;
    let forged = MrRemote::new(target.as_remote().addr, 64, target.rkey() + 1000);
    let bad = a.write(&[local.slice(0, 8).unwrap()], &forged)?;

    assert_eq!(block_on(good)?, 8);
    assert_eq!(status_of(block_on(bad)), WcStatus::RemAccessErr);
    // The error moved the QP to the error state, flushing its receive.
    assert_eq!(status_of(block_on(pending_recv)), WcStatus::WrFlushErr);
    assert_eq!(a.state(), QpState::Error);

    // Later work is flushed too; the peer is unaffected.
    let after = a.send(&[local.slice(0, 8).unwrap()])?;
    assert_eq!(status_of(block_on(after)), WcStatus::WrFlushErr);
    assert_eq!(b.state(), QpState::Rts);
    Ok(())
}

#[test]
fn local_key_and_length_errors() -> Result<()> {
    let rig = Rig::new()?;
    let (a, b) = rig.pair()?;
    let src = rig.mr(64);
    let small = rig.mr(16);

    let recv = b.recv(&[small.as_slice()])?;
    let send = a.send(&[src.as_slice()])?;
    assert_eq!(status_of(block_on(recv)), WcStatus::LocLenErr);
    assert_eq!(status_of(block_on(send)), WcStatus::RemOpErr);

    let (c, _d) = rig.pair()?;
    let bogus = MrSlice::new(src.as_slice().addr(), 8, 0xdead);
    let read = c.read(&[bogus], &small.as_remote().slice(0, 8).unwrap())?;
    assert_eq!(status_of(block_on(read)), WcStatus::LocProtErr);
    Ok(())
}

#[test]
fn psn_mismatch_exceeds_retries() -> Result<()> {
    let rig = Rig::new()?;
    let mut a = rig.qp()?;
    let mut b = rig.qp()?;
    let (ea, eb) = (a.endpoint(), b.endpoint());

    a.bind_peer(QpHandshake::new(eb, Vec::new()))?;
    let wrong = QpEndpoint::new(ea.lid, ea.qpn, ea.psn + 1);
    b.bind_peer(QpHandshake::new(wrong, Vec::new()))?;

    let mr = rig.mr(8);
    let send = a.send(&[mr.as_slice()])?;
    assert_eq!(status_of(block_on(send)), WcStatus::RetryExcErr);
    Ok(())
}

#[test]
fn dropping_qp_flushes_outstanding_recvs() -> Result<()> {
    let rig = Rig::new()?;
    let (_a, b) = rig.pair()?;
    let buf = rig.mr(32);

    let recvs = (0..4)
        .map(|i| b.recv(&[buf.slice(i * 8, 8).unwrap()]))
        .collect::<cordma::Result<Vec<_>>>()?;
    drop(b);
    for recv in recvs {
        assert_eq!(status_of(block_on(recv)), WcStatus::WrFlushErr);
    }
    Ok(())
}

#[test]
fn post_errors_surface_synchronously() -> Result<()> {
    let rig = Rig::new()?;
    let mr = rig.mr(8);

    let fresh = rig.qp()?;
    match fresh.send(&[mr.as_slice()]) {
        Err(Error::Post(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidInput),
        other => panic!("unexpected: {:?}", other),
    }
    assert!(matches!(fresh.recv(&[mr.as_slice()]), Err(Error::Post(_))));

    let caps = QpCaps {
        max_recv_wr: 2,
        ..QpCaps::default()
    };
    let mut small = Qp::new(Arc::new(rig.builder().caps(caps).build()?), rig.exec.clone());
    let mut peer = rig.qp()?;
    Connector::connect_local(&mut small, &mut peer)?;
    let _r1 = small.recv(&[mr.as_slice()])?;
    let _r2 = small.recv(&[mr.as_slice()])?;
    match small.recv(&[mr.as_slice()]) {
        Err(Error::Post(e)) => assert_eq!(e.kind(), io::ErrorKind::OutOfMemory),
        other => panic!("unexpected: {:?}", other),
    }
    Ok(())
}

#[test]
fn concurrent_posts_complete_exactly_once() -> Result<()> {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 200;

    let rig = Rig::with_depth(4096)?;
    let (a, _b) = rig.pair()?;
    let local = rig.mr(8);
    let target = rig.mr(8);
    let (tx, rx) = mpsc::channel();

    let posted: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let (a, tx) = (&a, tx.clone());
                let (src, dst) = (local.as_slice(), target.as_remote());
                s.spawn(move || {
                    (0..PER_THREAD)
                        .map(|_| {
                            let tx = tx.clone();
                            let op = SendOp::Write { remote: dst, imm: None };
                            a.post_send_with(&[src], op, move |wc| tx.send(wc.wr_id()).unwrap())
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });
    drop(tx);

    let mut seen = HashSet::new();
    for _ in 0..posted.len() {
        let id = rx.recv_timeout(Duration::from_secs(5))?;
        assert!(seen.insert(id), "completion {} delivered twice", id);
    }
    assert_eq!(seen, posted.into_iter().collect::<HashSet<_>>());
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(rig.exec.pending(), 0);
    Ok(())
}

#[test]
fn executor_teardown_cancels_outstanding_futures() -> Result<()> {
    let rig = Rig::new()?;
    let (_a, b) = rig.pair()?;
    let buf = rig.mr(8);
    let recv = b.recv(&[buf.as_slice()])?;

    let exec = rig.exec.clone();
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        exec.shutdown();
        exec.join();
        done_tx.send(()).unwrap();
    });
    done_rx.recv_timeout(Duration::from_secs(5))?;

    assert!(matches!(block_on(recv), Err(Error::Cancelled)));
    // Nothing can be registered any more: new operations resolve at once.
    let late = b.recv(&[buf.as_slice()])?;
    assert!(matches!(block_on(late), Err(Error::Cancelled)));
    Ok(())
}

#[test]
fn cq_overrun_stops_poller() -> Result<()> {
    let nic = Fabric::new().open_nic();
    let cq = nic.create_cq(2)?;
    let exec = Arc::new(Executor::new(1)?);
    let builder = QpBuilder::new(&nic).send_cq(&cq).recv_cq(&cq);
    let mut a = Qp::new(Arc::new(builder.build()?), exec.clone());
    let mut b = Qp::new(Arc::new(builder.build()?), exec.clone());
    Connector::connect_local(&mut a, &mut b)?;

    let local = nic.reg_mr(8)?;
    let target = nic.reg_mr(8)?;
    let futs = (0..3)
        .map(|_| a.write(&[local.as_slice()], &target.as_remote()))
        .collect::<cordma::Result<Vec<_>>>()?;

    let mut poller = CqPoller::spawn(cq.cq().clone(), exec.clone())?;
    let start = std::time::Instant::now();
    while !poller.is_stopped() {
        assert!(start.elapsed() < Duration::from_secs(5), "poller kept running");
        thread::sleep(Duration::from_millis(1));
    }
    assert!(!cq.cq().is_claimed());

    match poller.stop() {
        Err(Error::Poll(e)) => assert_eq!(e.raw_os_error(), Some(libc::EOVERFLOW)),
        other => panic!("unexpected: {:?}", other),
    }
    drop(poller);
    exec.shutdown();
    exec.join();
    for fut in futs {
        assert!(matches!(block_on(fut), Err(Error::Cancelled)));
    }
    Ok(())
}

#[test]
fn stopped_poller_leaves_completions_queued() -> Result<()> {
    let mut rig = Rig::new()?;
    let (a, _b) = rig.pair()?;
    rig.poller.stop()?;
    assert!(rig.poller.is_stopped());

    let local = rig.mr(8);
    let target = rig.mr(8);
    let fut = a.write(&[local.as_slice()], &target.as_remote())?;
    thread::sleep(Duration::from_millis(20));
    assert_eq!(rig.exec.pending(), 1);

    let _poller = CqPoller::spawn(rig.cq.cq().clone(), rig.exec.clone())?;
    assert_eq!(block_on(fut)?, 8);
    Ok(())
}
