//! Client sessions and the two dispatch tables of the gateway.
//!
//! The gateway is a stateless pass-through for domain logic: it never
//! computes AOI and never touches simulation state. Its entire job is the
//! `account_id -> session` map, translating client packets into S2S
//! requests, and fanning game broadcasts out to exactly the sessions the
//! simulation named.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, info};
use veldt_protocol::packets::{game, gateway};
use veldt_protocol::{decode_payload, encode_frame, packet_id, Encode, Packet, PacketDispatcher};

/// A connected client: the serialized write queue of its socket. The
/// serial distinguishes a session from a newer one that took over the same
/// account id, so a late disconnect cannot evict its successor.
pub(crate) struct Session {
    pub(crate) serial: u64,
    pub(crate) out: flume::Sender<BytesMut>,
}

pub(crate) struct Shared {
    pub(crate) sessions: Mutex<HashMap<String, Session>>,
    game_tx: flume::Sender<BytesMut>,
    next_serial: AtomicU64,
}

impl Shared {
    pub(crate) fn new(game_tx: flume::Sender<BytesMut>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            game_tx,
            next_serial: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_serial(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn send_to_game<P>(&self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        self.game_tx
            .send(encode_frame(pkt)?)
            .map_err(|_| anyhow!("game link closed"))
    }
}

/// Per-connection handle the client dispatcher runs against.
pub(crate) struct ClientConn {
    pub(crate) shared: Arc<Shared>,
    pub(crate) out: flume::Sender<BytesMut>,
    pub(crate) serial: u64,
    pub(crate) account_id: Option<String>,
}

impl ClientConn {
    fn send<P>(&self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        // A closed queue means the client is already gone; nothing to do.
        let _ = self.out.send(encode_frame(pkt)?);
        Ok(())
    }

    fn account_id(&self) -> anyhow::Result<&str> {
        self.account_id
            .as_deref()
            .ok_or_else(|| anyhow!("packet before ConnectReq"))
    }

    /// Removes this session from the map (unless a newer session took the
    /// account over) and tells the simulation to evict the entity.
    pub(crate) fn disconnect(&self) {
        let Some(account_id) = &self.account_id else {
            return;
        };

        let mut sessions = self.shared.sessions.lock();
        if sessions
            .get(account_id)
            .is_some_and(|s| s.serial == self.serial)
        {
            sessions.remove(account_id);
        }
        drop(sessions);

        if self
            .shared
            .send_to_game(&game::LeaveReq {
                account_id: account_id.clone(),
            })
            .is_err()
        {
            debug!("game link closed before LeaveReq could be sent");
        }

        info!(account = %account_id, "client disconnected");
    }
}

/// Dispatch table for the client-facing port.
pub(crate) fn client_dispatcher() -> PacketDispatcher<ClientConn> {
    let mut dispatcher = PacketDispatcher::new();

    dispatcher.register(packet_id::CONNECT_REQ_C2S, handle_connect_req);
    dispatcher.register(packet_id::CHAT_REQ_C2S, handle_chat_req);
    dispatcher.register(packet_id::MOVE_REQ_C2S, handle_move_req);

    dispatcher
}

fn handle_connect_req(conn: &mut ClientConn, payload: &[u8]) -> anyhow::Result<()> {
    let pkt: gateway::ConnectReqC2s = decode_payload(payload)?;

    // The token is opaque here: the world service minted it, the gateway
    // trusts its presence once and discards it.
    if pkt.account_id.is_empty() || pkt.session_token.is_empty() {
        return conn.send(&gateway::ConnectResS2c { success: false });
    }

    conn.account_id = Some(pkt.account_id.clone());
    conn.shared.sessions.lock().insert(
        pkt.account_id.clone(),
        Session {
            serial: conn.serial,
            out: conn.out.clone(),
        },
    );

    info!(account = %pkt.account_id, "client connected to the world");

    conn.send(&gateway::ConnectResS2c { success: true })
}

fn handle_chat_req(conn: &mut ClientConn, payload: &[u8]) -> anyhow::Result<()> {
    let pkt: gateway::ChatReqC2s = decode_payload(payload)?;
    let account_id = conn.account_id()?.to_owned();

    // Chat is world-wide by design; AOI does not apply.
    let bytes = encode_frame(&gateway::ChatResS2c {
        account_id,
        msg: pkt.msg,
    })?;

    for session in conn.shared.sessions.lock().values() {
        let _ = session.out.send(bytes.clone());
    }

    Ok(())
}

fn handle_move_req(conn: &mut ClientConn, payload: &[u8]) -> anyhow::Result<()> {
    let pkt: gateway::MoveReqC2s = decode_payload(payload)?;
    let account_id = conn.account_id()?.to_owned();

    conn.shared.send_to_game(&game::MoveReq {
        account_id,
        x: pkt.x,
        y: pkt.y,
        z: pkt.z,
        yaw: pkt.yaw,
    })
}

/// Dispatch table for the game-facing S2S link. The simulation's
/// `target_account_ids` list is authoritative; sessions absent from the
/// map are skipped without fuss.
pub(crate) fn game_dispatcher() -> PacketDispatcher<Arc<Shared>> {
    let mut dispatcher = PacketDispatcher::new();

    dispatcher.register(
        packet_id::GAME_GATEWAY_MOVE_RES,
        |shared: &mut Arc<Shared>, payload| {
            let pkt: game::MoveRes = decode_payload(payload)?;

            let bytes = encode_frame(&gateway::MoveResS2c {
                account_id: pkt.account_id,
                x: pkt.x,
                y: pkt.y,
                z: pkt.z,
                yaw: pkt.yaw,
            })?;

            fan_out(shared, &pkt.target_account_ids, bytes);
            Ok(())
        },
    );

    dispatcher.register(
        packet_id::GAME_GATEWAY_ATTACK_RES,
        |shared: &mut Arc<Shared>, payload| {
            let pkt: game::AttackRes = decode_payload(payload)?;

            let bytes = encode_frame(&gateway::AttackResS2c {
                attacker_uid: pkt.attacker_uid,
                target_account_id: pkt.target_account_id,
                damage: pkt.damage,
                target_remain_hp: pkt.target_remain_hp,
            })?;

            fan_out(shared, &pkt.target_account_ids, bytes);
            Ok(())
        },
    );

    dispatcher
}

fn fan_out(shared: &Shared, targets: &[String], bytes: BytesMut) {
    let sessions = shared.sessions.lock();

    for target in targets {
        if let Some(session) = sessions.get(target) {
            let _ = session.out.send(bytes.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use veldt_protocol::PacketDecoder;

    use super::*;

    fn test_shared() -> (Arc<Shared>, flume::Receiver<BytesMut>) {
        let (game_tx, game_rx) = flume::unbounded();
        (Arc::new(Shared::new(game_tx)), game_rx)
    }

    fn test_conn(shared: &Arc<Shared>) -> (ClientConn, flume::Receiver<BytesMut>) {
        let (out, rx) = flume::unbounded();
        (
            ClientConn {
                shared: shared.clone(),
                out,
                serial: shared.next_serial(),
                account_id: None,
            },
            rx,
        )
    }

    fn connect(conn: &mut ClientConn, dispatcher: &PacketDispatcher<ClientConn>, account: &str) {
        let frame = encode_frame(&gateway::ConnectReqC2s {
            account_id: account.to_owned(),
            session_token: "token".to_owned(),
        })
        .unwrap();

        assert!(dispatcher.dispatch(conn, packet_id::CONNECT_REQ_C2S, &frame[4..]));
    }

    fn decode_one<P>(rx: &flume::Receiver<BytesMut>) -> P
    where
        P: Packet + for<'a> veldt_protocol::Decode<'a>,
    {
        let mut dec = PacketDecoder::new();
        dec.queue_bytes(rx.try_recv().expect("expected a frame"));
        dec.try_next_frame().unwrap().unwrap().decode().unwrap()
    }

    #[test]
    fn connect_inserts_the_session_and_replies_success() {
        let (shared, _game_rx) = test_shared();
        let dispatcher = client_dispatcher();
        let (mut conn, rx) = test_conn(&shared);

        connect(&mut conn, &dispatcher, "AAA");

        let res: gateway::ConnectResS2c = decode_one(&rx);
        assert!(res.success);
        assert!(shared.sessions.lock().contains_key("AAA"));
    }

    #[test]
    fn connect_with_an_empty_token_is_refused() {
        let (shared, _game_rx) = test_shared();
        let dispatcher = client_dispatcher();
        let (mut conn, rx) = test_conn(&shared);

        let frame = encode_frame(&gateway::ConnectReqC2s {
            account_id: "AAA".to_owned(),
            session_token: String::new(),
        })
        .unwrap();
        dispatcher.dispatch(&mut conn, packet_id::CONNECT_REQ_C2S, &frame[4..]);

        let res: gateway::ConnectResS2c = decode_one(&rx);
        assert!(!res.success);
        assert!(shared.sessions.lock().is_empty());
    }

    #[test]
    fn chat_fans_out_to_every_session() {
        let (shared, _game_rx) = test_shared();
        let dispatcher = client_dispatcher();

        let (mut alice, alice_rx) = test_conn(&shared);
        let (mut bob, bob_rx) = test_conn(&shared);
        connect(&mut alice, &dispatcher, "AAA");
        connect(&mut bob, &dispatcher, "BBB");
        let _: gateway::ConnectResS2c = decode_one(&alice_rx);
        let _: gateway::ConnectResS2c = decode_one(&bob_rx);

        let frame = encode_frame(&gateway::ChatReqC2s {
            msg: "hello".to_owned(),
        })
        .unwrap();
        dispatcher.dispatch(&mut alice, packet_id::CHAT_REQ_C2S, &frame[4..]);

        for rx in [&alice_rx, &bob_rx] {
            let res: gateway::ChatResS2c = decode_one(rx);
            assert_eq!(res.account_id, "AAA");
            assert_eq!(res.msg, "hello");
        }
    }

    #[test]
    fn move_req_is_wrapped_onto_the_game_link() {
        let (shared, game_rx) = test_shared();
        let dispatcher = client_dispatcher();
        let (mut conn, rx) = test_conn(&shared);
        connect(&mut conn, &dispatcher, "AAA");
        let _: gateway::ConnectResS2c = decode_one(&rx);

        let frame = encode_frame(&gateway::MoveReqC2s {
            x: 5.0,
            y: 6.0,
            z: 0.0,
            yaw: 90.0,
        })
        .unwrap();
        dispatcher.dispatch(&mut conn, packet_id::MOVE_REQ_C2S, &frame[4..]);

        let req: game::MoveReq = decode_one(&game_rx);
        assert_eq!(req.account_id, "AAA");
        assert_eq!((req.x, req.y, req.yaw), (5.0, 6.0, 90.0));
    }

    #[test]
    fn broadcasts_reach_only_the_named_targets() {
        let (shared, _game_rx) = test_shared();
        let client_disp = client_dispatcher();
        let game_disp = game_dispatcher();

        let (mut alice, alice_rx) = test_conn(&shared);
        let (mut bob, bob_rx) = test_conn(&shared);
        connect(&mut alice, &client_disp, "AAA");
        connect(&mut bob, &client_disp, "BBB");
        let _: gateway::ConnectResS2c = decode_one(&alice_rx);
        let _: gateway::ConnectResS2c = decode_one(&bob_rx);

        let frame = encode_frame(&game::MoveRes {
            account_id: "BBB".to_owned(),
            x: 1.0,
            y: 2.0,
            z: 0.0,
            yaw: 0.0,
            // Only Alice is in the AOI; an unknown id must be skipped.
            target_account_ids: vec!["AAA".to_owned(), "GHOST".to_owned()],
        })
        .unwrap();

        let mut shared_ref = shared.clone();
        game_disp.dispatch(&mut shared_ref, packet_id::GAME_GATEWAY_MOVE_RES, &frame[4..]);

        let res: gateway::MoveResS2c = decode_one(&alice_rx);
        assert_eq!(res.account_id, "BBB");
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn stale_disconnect_cannot_evict_a_successor_session() {
        let (shared, game_rx) = test_shared();
        let dispatcher = client_dispatcher();

        let (mut old_conn, _old_rx) = test_conn(&shared);
        connect(&mut old_conn, &dispatcher, "AAA");

        let (mut new_conn, _new_rx) = test_conn(&shared);
        connect(&mut new_conn, &dispatcher, "AAA");

        old_conn.disconnect();

        // The replacement session survives; the simulation still hears
        // about the old socket going away.
        assert!(shared.sessions.lock().contains_key("AAA"));
        let req: game::LeaveReq = decode_one(&game_rx);
        assert_eq!(req.account_id, "AAA");
    }
}
