//! A scripted client that exercises the whole backend: log in, select a
//! world, present the minted token to the gateway, then walk a square
//! while printing everything the world sends back.

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{ensure, Context};
use bytes::BytesMut;
use clap::Parser;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use veldt_protocol::packets::{gateway, login};
use veldt_protocol::{
    packet_id, Decode, Encode, Packet, PacketDecoder, PacketEncoder, PacketFrame,
};

const READ_BUF_SIZE: usize = 4096;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Scripted veldt client")]
struct Cli {
    /// The login service to start the session against.
    #[clap(long, default_value = "127.0.0.1:7777")]
    login_addr: SocketAddr,

    /// Account id; a random suffix is appended when omitted.
    #[clap(long)]
    account: Option<String>,

    #[clap(long, default_value = "hunter2")]
    password: String,

    #[clap(long, default_value_t = 1)]
    world: u8,

    /// Laps around the patrol square before exiting.
    #[clap(long, default_value_t = 3)]
    laps: u32,
}

struct PacketIo {
    stream: TcpStream,
    enc: PacketEncoder,
    dec: PacketDecoder,
    frame: PacketFrame,
}

impl PacketIo {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            enc: PacketEncoder::new(),
            dec: PacketDecoder::new(),
            frame: PacketFrame {
                id: u16::MAX,
                body: BytesMut::new(),
            },
        }
    }

    async fn send_packet<P>(&mut self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        self.enc.append_packet(pkt)?;
        let bytes = self.enc.take();
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    async fn recv_packet<'a, P>(&'a mut self) -> anyhow::Result<P>
    where
        P: Packet + Decode<'a>,
    {
        loop {
            if let Some(frame) = self.dec.try_next_frame()? {
                self.frame = frame;

                return self.frame.decode();
            }

            self.dec.reserve(READ_BUF_SIZE);
            let mut buf = self.dec.take_capacity();

            if self.stream.read_buf(&mut buf).await? == 0 {
                return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
            }

            self.dec.queue_bytes(buf);
        }
    }

    async fn recv_frame(&mut self) -> anyhow::Result<PacketFrame> {
        loop {
            if let Some(frame) = self.dec.try_next_frame()? {
                return Ok(frame);
            }

            self.dec.reserve(READ_BUF_SIZE);
            let mut buf = self.dec.take_capacity();

            if self.stream.read_buf(&mut buf).await? == 0 {
                return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
            }

            self.dec.queue_bytes(buf);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let account = cli
        .account
        .clone()
        .unwrap_or_else(|| format!("bot_{:04x}", rand::thread_rng().gen::<u16>()));

    // Stage 1: login + world select.
    let mut login_io = PacketIo::new(
        TcpStream::connect(cli.login_addr)
            .await
            .with_context(|| format!("failed to reach the login service at {}", cli.login_addr))?,
    );

    login_io
        .send_packet(&login::LoginReqC2s {
            id: account.clone(),
            password: cli.password.clone(),
        })
        .await?;

    let res: login::LoginResS2c = login_io.recv_packet().await?;
    ensure!(res.success, "login refused for '{account}'");
    info!(%account, "logged in");

    login_io
        .send_packet(&login::WorldSelectReqC2s { world_id: cli.world })
        .await?;

    let select: login::WorldSelectResS2c = login_io.recv_packet().await?;
    ensure!(select.success, "world {} refused", cli.world);

    let gateway_addr = format!("{}:{}", select.gateway_ip, select.gateway_port);
    info!(world = cli.world, %gateway_addr, "world selected");

    drop(login_io);

    // Stage 2: hand the token to the gateway and enter the world.
    let mut gw = PacketIo::new(
        TcpStream::connect(&gateway_addr)
            .await
            .with_context(|| format!("failed to reach the gateway at {gateway_addr}"))?,
    );

    gw.send_packet(&gateway::ConnectReqC2s {
        account_id: account.clone(),
        session_token: select.session_token,
    })
    .await?;

    let res: gateway::ConnectResS2c = gw.recv_packet().await?;
    ensure!(res.success, "gateway refused the session token");
    info!("entered the world");

    gw.send_packet(&gateway::ChatReqC2s {
        msg: format!("{account} reporting in"),
    })
    .await?;

    // Stage 3: patrol a square near the first monster camp and print
    // whatever the world has to say about it.
    let corners = [(2.0, 40.0), (12.0, 40.0), (12.0, 50.0), (2.0, 50.0)];

    for lap in 0..cli.laps {
        info!(lap, "starting a lap");

        for (x, y) in corners {
            gw.send_packet(&gateway::MoveReqC2s {
                x,
                y,
                z: 0.0,
                yaw: 0.0,
            })
            .await?;

            drain(&mut gw).await?;
            sleep(Duration::from_millis(250)).await;
        }
    }

    info!("done");

    Ok(())
}

/// Prints incoming packets until the line goes quiet for a moment.
async fn drain(gw: &mut PacketIo) -> anyhow::Result<()> {
    loop {
        let frame = match timeout(Duration::from_millis(100), gw.recv_frame()).await {
            Err(_) => return Ok(()), // quiet
            Ok(frame) => frame?,
        };

        match frame.id {
            packet_id::MOVE_RES_S2C => {
                let pkt: gateway::MoveResS2c = frame.decode()?;
                info!(
                    account = %pkt.account_id,
                    x = pkt.x,
                    y = pkt.y,
                    "saw movement"
                );
            }
            packet_id::CHAT_RES_S2C => {
                let pkt: gateway::ChatResS2c = frame.decode()?;
                info!(from = %pkt.account_id, msg = %pkt.msg, "chat");
            }
            packet_id::ATTACK_RES_S2C => {
                let pkt: gateway::AttackResS2c = frame.decode()?;
                info!(
                    attacker = pkt.attacker_uid,
                    target = %pkt.target_account_id,
                    damage = pkt.damage,
                    remain_hp = pkt.target_remain_hp,
                    "combat"
                );
            }
            other => warn!("unexpected packet id {other}"),
        }
    }
}
