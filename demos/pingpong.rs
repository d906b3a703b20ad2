use std::sync::Arc;
use std::time::Instant;

use cordma::prelude::*;
use cordma::soft::{Fabric, QpBuilder, SoftCq, SoftNic};

const ROUNDS: usize = 1000;
const MSG_SIZE: usize = 64;

struct Node {
    nic: SoftNic,
    _cq: SoftCq,
    exec: Arc<Executor>,
    _poller: CqPoller,
    factory: Arc<dyn QpFactory>,
}

fn node(fabric: &Fabric, config: &Config) -> anyhow::Result<Node> {
    let nic = fabric.open_nic();
    let cq = nic.create_cq(config.cq.depth)?;
    let exec = Arc::new(Executor::with_config(&config.executor)?);
    let poller = CqPoller::spawn_with(cq.cq().clone(), exec.clone(), &config.poller)?;
    let factory: Arc<dyn QpFactory> = Arc::new(QpBuilder::new(&nic).send_cq(&cq).recv_cq(&cq));
    Ok(Node {
        nic,
        _cq: cq,
        exec,
        _poller: poller,
        factory,
    })
}

// Returns the queue pair so that it outlives the client's one-sided accesses.
async fn server(node: &Node, acceptor: Acceptor) -> anyhow::Result<Qp> {
    let qp = acceptor.accept().await?;
    let buf = node.nic.reg_mr(MSG_SIZE)?;

    for _ in 0..ROUNDS {
        let got = qp.recv(&[buf.as_slice()])?.await?;
        qp.send(&[buf.slice(0, got.len).unwrap()])?.await?;
    }
    Ok(qp)
}

async fn client(
    node: &Node,
    connector: Connector,
    addr: std::net::SocketAddr,
) -> anyhow::Result<()> {
    let qp = connector.connect(addr).await?;
    let remote = MrRemote::decode(&mut qp.peer().unwrap().user_data())?;
    let buf = node.nic.reg_mr(MSG_SIZE * 2)?;
    let (ping, pong) = (buf.slice(0, MSG_SIZE).unwrap(), buf.slice(MSG_SIZE, MSG_SIZE).unwrap());

    let start = Instant::now();
    for i in 0..ROUNDS {
        buf.with_bytes_mut(|b| b[..MSG_SIZE].fill(i as u8));
        let recv = qp.recv(&[pong])?;
        qp.send(&[ping])?.await?;
        let got = recv.await?;
        assert_eq!(got.len, MSG_SIZE);
    }
    let elapsed = start.elapsed();
    println!(
        "{} send/recv round trips in {:?} ({:.2} us each)",
        ROUNDS,
        elapsed,
        elapsed.as_secs_f64() * 1e6 / ROUNDS as f64
    );

    // One-sided access to the region the server advertised.
    qp.write(&[ping], &remote.slice(0, MSG_SIZE).unwrap())?.await?;
    qp.read(&[pong], &remote.slice(0, MSG_SIZE).unwrap())?.await?;
    let word = remote.slice(MSG_SIZE, 8).unwrap();
    qp.fetch_add(buf.slice(0, 8).unwrap(), &word, 1)?.await?;
    println!("counter was {}", buf.read_u64(0));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_toml(path)?,
        None => Config::default(),
    };

    let fabric = Fabric::new();
    let (srv, cli) = (node(&fabric, &config)?, node(&fabric, &config)?);

    let exposed = srv.nic.reg_mr(MSG_SIZE + 8)?;
    let acceptor = Acceptor::bind("127.0.0.1:0", srv.factory.clone(), srv.exec.clone())
        .await?
        .with_config(&config.handshake)
        .with_user_data(exposed.as_remote().to_bytes());
    let addr = acceptor.local_addr()?;
    let connector =
        Connector::new(cli.factory.clone(), cli.exec.clone()).with_config(&config.handshake);

    let (s, c) = tokio::join!(server(&srv, acceptor), client(&cli, connector, addr));
    let _qp = s?;
    c?;
    println!("final region content: {:?}", &exposed.to_vec()[..8]);
    Ok(())
}
