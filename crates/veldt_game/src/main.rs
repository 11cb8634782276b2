//! The Game process: owns the simulation and serves the S2S port the
//! gateway connects to.
//!
//! Network I/O runs on tokio worker threads; the simulation runs on a
//! single task that owns all mutable game state. Decoded frames and the
//! 10 Hz tick are funneled into that task through one queue, so frames
//! are processed in arrival order and a tick can never overlap a handler.

mod monster;
mod sim;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::BytesMut;
use clap::Parser;
use glam::Vec3;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use veldt_nav::{bake_dummy_map, NavMesh};
use veldt_protocol::{PacketDecoder, PacketFrame};
use veldt_zone::Zone;

use crate::monster::MonsterStats;
use crate::sim::{s2s_dispatcher, Sim};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

const READ_BUF_SIZE: usize = 4096;

/// Fixed spawn points; monsters are created at startup and respawn
/// in-place, never despawning.
const MONSTER_SPAWNS: [(f32, f32); 3] = [(5.0, 45.0), (120.0, 80.0), (40.0, 200.0)];

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "The veldt simulation server")]
struct Cli {
    /// The socket address to listen on for the gateway's S2S link.
    #[clap(long, default_value = "127.0.0.1:9000")]
    addr: std::net::SocketAddr,

    /// Path to the baked nav-mesh set. Baked on the spot if missing.
    #[clap(long, default_value = "dummy_map.bin")]
    navmesh: PathBuf,

    /// World extents and grid granularity.
    #[clap(long, default_value_t = 1000)]
    world_width: i32,
    #[clap(long, default_value_t = 1000)]
    world_height: i32,
    #[clap(long, default_value_t = 50)]
    sector_size: i32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    bake_dummy_map(&cli.navmesh).context("failed to bake the dummy nav-mesh")?;

    let mut nav = NavMesh::new();
    if let Err(e) = nav.load(&cli.navmesh) {
        warn!("nav-mesh load failed, monsters use straight-line paths: {e}");
    }

    let mut sim = Sim::new(
        Zone::new(cli.world_width, cli.world_height, cli.sector_size),
        Arc::new(nav),
    );

    for (x, y) in MONSTER_SPAWNS {
        sim.spawn_monster(Vec3::new(x, y, 0.0), MonsterStats::default());
    }

    let (event_tx, event_rx) = flume::unbounded();

    let listener = TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;

    info!("game server listening on {}", cli.addr);

    tokio::spawn(accept_loop(listener, event_tx));

    run_sim(sim, event_rx).await;

    Ok(())
}

enum SimEvent {
    /// A gateway S2S connection came up; its serialized write queue. The
    /// serial keeps a late teardown of an old link from clobbering a
    /// replacement that attached in the meantime.
    Attached(u64, flume::Sender<BytesMut>),
    Frame(PacketFrame),
    Detached(u64),
}

async fn accept_loop(listener: TcpListener, events: flume::Sender<SimEvent>) {
    let mut next_serial = 0u64;

    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                info!(%remote, "gateway connected");
                tokio::spawn(handle_gateway(stream, next_serial, events.clone()));
                next_serial += 1;
            }
            Err(e) => error!("failed to accept incoming connection: {e}"),
        }
    }
}

async fn handle_gateway(stream: TcpStream, serial: u64, events: flume::Sender<SimEvent>) {
    if let Err(e) = stream.set_nodelay(true) {
        error!("failed to set TCP_NODELAY: {e}");
    }

    let (mut reader, mut writer) = stream.into_split();

    let (out_tx, out_rx) = flume::unbounded::<BytesMut>();

    if events
        .send_async(SimEvent::Attached(serial, out_tx))
        .await
        .is_err()
    {
        return;
    }

    let writer_task = tokio::spawn(async move {
        while let Ok(bytes) = out_rx.recv_async().await {
            if let Err(e) = writer.write_all(&bytes).await {
                debug!("error writing data to stream: {e}");
                break;
            }
        }
    });

    let mut dec = PacketDecoder::new();
    let mut buf = BytesMut::new();

    loop {
        match dec.try_next_frame() {
            Ok(Some(frame)) => {
                if events.send_async(SimEvent::Frame(frame)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                // Incomplete frame. Need more data.
                buf.reserve(READ_BUF_SIZE);

                match reader.read_buf(&mut buf).await {
                    Ok(0) => break, // Reader is at EOF.
                    Ok(_) => {}
                    Err(e) => {
                        debug!("error reading data from stream: {e}");
                        break;
                    }
                }

                dec.queue_bytes(buf.split());
            }
            Err(e) => {
                warn!("error decoding frame: {e:#}");
                break;
            }
        }
    }

    let _ = events.send_async(SimEvent::Detached(serial)).await;
    writer_task.abort();

    info!("gateway disconnected");
}

/// The single-writer simulation loop. Every mutation of the player tables,
/// the zone and the monsters happens here and nowhere else.
async fn run_sim(mut sim: Sim, events: flume::Receiver<SimEvent>) {
    let dispatcher = s2s_dispatcher();

    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_tick = Instant::now();
    let mut link_serial = 0;

    loop {
        tokio::select! {
            event = events.recv_async() => match event {
                Ok(SimEvent::Attached(serial, tx)) => {
                    link_serial = serial;
                    sim.attach_gateway(tx);
                }
                Ok(SimEvent::Detached(serial)) => {
                    if serial == link_serial {
                        sim.detach_gateway();
                    }
                }
                Ok(SimEvent::Frame(frame)) => {
                    dispatcher.dispatch(&mut sim, frame.id, &frame.body);
                }
                // All senders gone; the process is shutting down.
                Err(_) => break,
            },
            _ = interval.tick() => {
                let now = Instant::now();
                sim.tick(now.duration_since(last_tick).as_secs_f32());
                last_tick = now;
            }
        }
    }
}
