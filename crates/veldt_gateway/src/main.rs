//! The Gateway process: terminates client connections and routes between
//! them and the game server.
//!
//! One persistent S2S connection to the game server carries everything in
//! both directions. If that link cannot be established at boot the process
//! aborts immediately, since there is no point accepting clients without a
//! simulation. If it breaks later the process terminates rather than
//! degrade silently.

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

use crate::session::{client_dispatcher, game_dispatcher, ClientConn, Shared};

const READ_BUF_SIZE: usize = 4096;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "The veldt client gateway")]
struct Cli {
    /// The socket address to listen on for client connections.
    #[clap(long, default_value = "127.0.0.1:8888")]
    addr: SocketAddr,

    /// The socket address of the game server's S2S port.
    #[clap(long, default_value = "127.0.0.1:9000")]
    game_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let game = TcpStream::connect(cli.game_addr)
        .await
        .with_context(|| format!("failed to reach the game server at {}", cli.game_addr))?;

    if let Err(e) = game.set_nodelay(true) {
        error!("failed to set TCP_NODELAY: {e}");
    }

    info!("connected to the game server at {}", cli.game_addr);

    let (game_reader, mut game_writer) = game.into_split();
    let (game_tx, game_rx) = flume::unbounded::<BytesMut>();

    let shared = Arc::new(Shared::new(game_tx));

    tokio::spawn(async move {
        while let Ok(bytes) = game_rx.recv_async().await {
            if let Err(e) = game_writer.write_all(&bytes).await {
                debug!("error writing to the game link: {e}");
                break;
            }
        }
    });

    let listener = TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;

    info!("gateway listening on {}", cli.addr);

    tokio::spawn(accept_loop(listener, shared.clone()));

    run_game_link(game_reader, shared).await;

    bail!("game link closed");
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

    // Every write to the socket goes through this task, so concurrent
    // handlers can never interleave partial frames on the wire.
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
            // Malformed frame: the connection is dropped silently.
            Err(e) => {
                debug!("dropping client: {e:#}");
                break;
            }
        }
    }

    writer_task.abort();
    conn.disconnect();
}

/// Reads the game link until it breaks. Returning from here takes the
/// whole process down.
async fn run_game_link(mut reader: OwnedReadHalf, mut shared: Arc<Shared>) {
    let dispatcher = game_dispatcher();

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
                        warn!("game link reached EOF");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("error reading the game link: {e}");
                        return;
                    }
                }

                dec.queue_bytes(buf.split());
            }
            Err(e) => {
                error!("error decoding the game link: {e:#}");
                return;
            }
        }
    }
}
