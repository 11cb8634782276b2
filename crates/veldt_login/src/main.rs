//! The Login process: authenticates clients and relays world selection to
//! the World service.
//!
//! Mirrors the gateway's shape: a client-facing accept loop, one
//! persistent S2S link upstream, and an abort-fast policy when that link
//! is missing at boot or breaks in steady state.

mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use bytes::BytesMut;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use veldt_protocol::{PacketDecoder, PacketDispatcher};

use crate::session::{client_dispatcher, world_dispatcher, ClientConn, Shared};

const READ_BUF_SIZE: usize = 4096;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "The veldt login service")]
struct Cli {
    /// The socket address to listen on for client connections.
    #[clap(long, default_value = "127.0.0.1:7777")]
    addr: SocketAddr,

    /// The socket address of the world service's S2S port.
    #[clap(long, default_value = "127.0.0.1:7000")]
    world_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let world = TcpStream::connect(cli.world_addr)
        .await
        .with_context(|| format!("failed to reach the world service at {}", cli.world_addr))?;

    if let Err(e) = world.set_nodelay(true) {
        error!("failed to set TCP_NODELAY: {e}");
    }

    info!("connected to the world service at {}", cli.world_addr);

    let (world_reader, mut world_writer) = world.into_split();
    let (world_tx, world_rx) = flume::unbounded::<BytesMut>();

    let shared = Arc::new(Shared::new(world_tx));

    tokio::spawn(async move {
        while let Ok(bytes) = world_rx.recv_async().await {
            if let Err(e) = world_writer.write_all(&bytes).await {
                debug!("error writing to the world link: {e}");
                break;
            }
        }
    });

    let listener = TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;

    info!("login service listening on {}", cli.addr);

    tokio::spawn(accept_loop(listener, shared.clone()));

    run_world_link(world_reader, shared).await;

    bail!("world link closed");
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let dispatcher = Arc::new(client_dispatcher());

    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!(%remote, "client connected");
                tokio::spawn(handle_client(stream, shared.clone(), dispatcher.clone()));
            }
            Err(e) => error!("failed to accept incoming connection: {e}"),
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    shared: Arc<Shared>,
    dispatcher: Arc<PacketDispatcher<ClientConn>>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        error!("failed to set TCP_NODELAY: {e}");
    }

    let (mut reader, mut writer) = stream.into_split();

    let (out_tx, out_rx) = flume::unbounded::<BytesMut>();

    let writer_task = tokio::spawn(async move {
        while let Ok(bytes) = out_rx.recv_async().await {
            if let Err(e) = writer.write_all(&bytes).await {
                debug!("error writing data to stream: {e}");
                break;
            }
        }
    });

    let mut conn = ClientConn {
        serial: shared.next_serial(),
        shared,
        out: out_tx,
        account_id: None,
    };

    let mut dec = PacketDecoder::new();
    let mut buf = BytesMut::new();

    loop {
        match dec.try_next_frame() {
            Ok(Some(frame)) => {
                dispatcher.dispatch(&mut conn, frame.id, &frame.body);
            }
            Ok(None) => {
                buf.reserve(READ_BUF_SIZE);

                match reader.read_buf(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("error reading data from stream: {e}");
                        break;
                    }
                }

                dec.queue_bytes(buf.split());
            }
            Err(e) => {
                debug!("dropping client: {e:#}");
                break;
            }
        }
    }

    writer_task.abort();
    conn.disconnect();
}

async fn run_world_link(mut reader: OwnedReadHalf, mut shared: Arc<Shared>) {
    let dispatcher = world_dispatcher();

    let mut dec = PacketDecoder::new();
    let mut buf = BytesMut::new();

    loop {
        match dec.try_next_frame() {
            Ok(Some(frame)) => {
                dispatcher.dispatch(&mut shared, frame.id, &frame.body);
            }
            Ok(None) => {
                buf.reserve(READ_BUF_SIZE);

                match reader.read_buf(&mut buf).await {
                    Ok(0) => {
                        warn!("world link reached EOF");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("error reading the world link: {e}");
                        return;
                    }
                }

                dec.queue_bytes(buf.split());
            }
            Err(e) => {
                error!("error decoding the world link: {e:#}");
                return;
            }
        }
    }
}
