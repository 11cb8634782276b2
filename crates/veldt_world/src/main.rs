//! The World process: answers world-selection requests from the login
//! service.
//!
//! For a known world id it picks the gateway endpoint and mints a fresh
//! session token binding the account to that world. The token is random,
//! opaque and mint-and-forget: the gateway accepts it on presentation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::BytesMut;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};
use veldt_protocol::packets::world;
use veldt_protocol::{
    decode_payload, encode_frame, packet_id, PacketDecoder, PacketDispatcher,
};

const READ_BUF_SIZE: usize = 4096;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "The veldt world service")]
struct Cli {
    /// The socket address to listen on for the login service's S2S link.
    #[clap(long, default_value = "127.0.0.1:7000")]
    addr: SocketAddr,

    /// The client-facing gateway endpoint handed out for world 1.
    #[clap(long, default_value = "127.0.0.1:8888")]
    gateway_addr: SocketAddr,
}

/// world id -> client-facing gateway endpoint.
type WorldTable = HashMap<u8, SocketAddr>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let worlds: Arc<WorldTable> = Arc::new(HashMap::from([(1, cli.gateway_addr)]));

    let listener = TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;

    info!("world service listening on {}", cli.addr);

    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                info!(%remote, "login service connected");
                tokio::spawn(handle_login_link(stream, worlds.clone()));
            }
            Err(e) => error!("failed to accept incoming connection: {e}"),
        }
    }
}

/// Session handle for one login-service link.
struct S2sConn {
    out: flume::Sender<BytesMut>,
    worlds: Arc<WorldTable>,
}

fn s2s_dispatcher() -> PacketDispatcher<S2sConn> {
    let mut dispatcher = PacketDispatcher::new();

    dispatcher.register(packet_id::LOGIN_WORLD_SELECT_REQ, |conn: &mut S2sConn, payload| {
        let pkt: world::WorldSelectReq = decode_payload(payload)?;

        let res = match conn.worlds.get(&pkt.world_id) {
            Some(endpoint) => {
                let session_token = mint_token();

                info!(
                    account = %pkt.account_id,
                    world = pkt.world_id,
                    %endpoint,
                    "minted session token"
                );

                world::WorldSelectRes {
                    account_id: pkt.account_id,
                    success: true,
                    gateway_ip: endpoint.ip().to_string(),
                    gateway_port: endpoint.port(),
                    session_token,
                }
            }
            None => {
                debug!(account = %pkt.account_id, world = pkt.world_id, "unknown world");

                world::WorldSelectRes {
                    account_id: pkt.account_id,
                    success: false,
                    gateway_ip: String::new(),
                    gateway_port: 0,
                    session_token: String::new(),
                }
            }
        };

        let _ = conn.out.send(encode_frame(&res)?);
        Ok(())
    });

    dispatcher
}

/// 32 hex chars of fresh randomness, bound to one (account, world) pair by
/// the reply that carries it.
fn mint_token() -> String {
    format!("{:032x}", rand::random::<u128>())
}

async fn handle_login_link(stream: TcpStream, worlds: Arc<WorldTable>) {
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

    let dispatcher = s2s_dispatcher();
    let mut conn = S2sConn {
        out: out_tx,
        worlds,
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
                debug!("dropping login link: {e:#}");
                break;
            }
        }
    }

    writer_task.abort();

    info!("login service disconnected");
}
