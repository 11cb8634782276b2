//! Login sessions and the two dispatch tables of the login service.
//!
//! The real logic here is the one-login gate: an account id may be logged
//! in at most once across the whole process, enforced on a small
//! mutex-guarded set. Credential checking itself is permissive: any
//! non-empty pair passes. Wiring up a credential store is a deployment
//! concern, not a protocol one.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, info};
use veldt_protocol::packets::{login, world};
use veldt_protocol::{decode_payload, encode_frame, packet_id, Encode, Packet, PacketDispatcher};

pub(crate) struct Session {
    pub(crate) serial: u64,
    pub(crate) out: flume::Sender<BytesMut>,
}

pub(crate) struct Shared {
    /// Accounts with an active login anywhere on this process.
    pub(crate) logged_in: Mutex<HashSet<String>>,
    /// account id -> session, for relaying World replies back to the
    /// client that asked.
    pub(crate) sessions: Mutex<HashMap<String, Session>>,
    world_tx: flume::Sender<BytesMut>,
    next_serial: AtomicU64,
}

impl Shared {
    pub(crate) fn new(world_tx: flume::Sender<BytesMut>) -> Self {
        Self {
            logged_in: Mutex::new(HashSet::new()),
            sessions: Mutex::new(HashMap::new()),
            world_tx,
            next_serial: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_serial(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn send_to_world<P>(&self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        self.world_tx
            .send(encode_frame(pkt)?)
            .map_err(|_| anyhow!("world link closed"))
    }
}

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
        let _ = self.out.send(encode_frame(pkt)?);
        Ok(())
    }

    /// Frees the account id on socket close so it can log in again.
    pub(crate) fn disconnect(&self) {
        let Some(account_id) = &self.account_id else {
            return;
        };

        self.shared.logged_in.lock().remove(account_id);

        let mut sessions = self.shared.sessions.lock();
        if sessions
            .get(account_id)
            .is_some_and(|s| s.serial == self.serial)
        {
            sessions.remove(account_id);
        }

        info!(account = %account_id, "account logged out");
    }
}

pub(crate) fn client_dispatcher() -> PacketDispatcher<ClientConn> {
    let mut dispatcher = PacketDispatcher::new();

    dispatcher.register(packet_id::LOGIN_REQ_C2S, handle_login_req);
    dispatcher.register(packet_id::WORLD_SELECT_REQ_C2S, handle_world_select_req);

    dispatcher
}

fn handle_login_req(conn: &mut ClientConn, payload: &[u8]) -> anyhow::Result<()> {
    let pkt: login::LoginReqC2s = decode_payload(payload)?;

    if pkt.id.is_empty() || pkt.password.is_empty() {
        return conn.send(&login::LoginResS2c { success: false });
    }

    // `insert` doubles as the duplicate check: a second login for a live
    // account is refused but its connection stays up.
    if !conn.shared.logged_in.lock().insert(pkt.id.clone()) {
        debug!(account = %pkt.id, "duplicate login refused");
        return conn.send(&login::LoginResS2c { success: false });
    }

    conn.shared.sessions.lock().insert(
        pkt.id.clone(),
        Session {
            serial: conn.serial,
            out: conn.out.clone(),
        },
    );
    conn.account_id = Some(pkt.id.clone());

    info!(account = %pkt.id, "account logged in");

    conn.send(&login::LoginResS2c { success: true })
}

fn handle_world_select_req(conn: &mut ClientConn, payload: &[u8]) -> anyhow::Result<()> {
    let pkt: login::WorldSelectReqC2s = decode_payload(payload)?;

    let account_id = conn
        .account_id
        .clone()
        .ok_or_else(|| anyhow!("world select before login"))?;

    conn.shared.send_to_world(&world::WorldSelectReq {
        account_id,
        world_id: pkt.world_id,
    })
}

/// Dispatch table for the world-facing S2S link: relays the mint result
/// back to the client that asked for it, keyed by account id.
pub(crate) fn world_dispatcher() -> PacketDispatcher<Arc<Shared>> {
    let mut dispatcher = PacketDispatcher::new();

    dispatcher.register(packet_id::WORLD_LOGIN_SELECT_RES, |shared: &mut Arc<Shared>, payload| {
        let pkt: world::WorldSelectRes = decode_payload(payload)?;

        let sessions = shared.sessions.lock();
        let Some(session) = sessions.get(&pkt.account_id) else {
            debug!(account = %pkt.account_id, "world reply for a session that is gone");
            return Ok(());
        };

        let _ = session.out.send(encode_frame(&login::WorldSelectResS2c {
            success: pkt.success,
            gateway_ip: pkt.gateway_ip,
            gateway_port: pkt.gateway_port,
            session_token: pkt.session_token,
        })?);

        Ok(())
    });

    dispatcher
}

#[cfg(test)]
mod tests {
    use veldt_protocol::PacketDecoder;

    use super::*;

    fn test_shared() -> (Arc<Shared>, flume::Receiver<BytesMut>) {
        let (world_tx, world_rx) = flume::unbounded();
        (Arc::new(Shared::new(world_tx)), world_rx)
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

    fn login(conn: &mut ClientConn, dispatcher: &PacketDispatcher<ClientConn>, id: &str) {
        let frame = encode_frame(&login::LoginReqC2s {
            id: id.to_owned(),
            password: "hunter2".to_owned(),
        })
        .unwrap();

        dispatcher.dispatch(conn, packet_id::LOGIN_REQ_C2S, &frame[4..]);
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
    fn first_login_succeeds() {
        let (shared, _world_rx) = test_shared();
        let dispatcher = client_dispatcher();
        let (mut conn, rx) = test_conn(&shared);

        login(&mut conn, &dispatcher, "AAA");

        let res: login::LoginResS2c = decode_one(&rx);
        assert!(res.success);
        assert!(shared.logged_in.lock().contains("AAA"));
    }

    #[test]
    fn duplicate_login_is_refused_and_leaves_the_set_alone() {
        let (shared, _world_rx) = test_shared();
        let dispatcher = client_dispatcher();

        let (mut first, first_rx) = test_conn(&shared);
        login(&mut first, &dispatcher, "AAA");
        let _: login::LoginResS2c = decode_one(&first_rx);

        let (mut second, second_rx) = test_conn(&shared);
        login(&mut second, &dispatcher, "AAA");

        let res: login::LoginResS2c = decode_one(&second_rx);
        assert!(!res.success);
        assert_eq!(shared.logged_in.lock().len(), 1);

        // The refused connection is still usable; the winning session is
        // untouched.
        assert!(second.account_id.is_none());
        assert_eq!(first.account_id.as_deref(), Some("AAA"));
    }

    #[test]
    fn empty_credentials_are_refused() {
        let (shared, _world_rx) = test_shared();
        let dispatcher = client_dispatcher();
        let (mut conn, rx) = test_conn(&shared);

        let frame = encode_frame(&login::LoginReqC2s {
            id: String::new(),
            password: "hunter2".to_owned(),
        })
        .unwrap();
        dispatcher.dispatch(&mut conn, packet_id::LOGIN_REQ_C2S, &frame[4..]);

        let res: login::LoginResS2c = decode_one(&rx);
        assert!(!res.success);
        assert!(shared.logged_in.lock().is_empty());
    }

    #[test]
    fn disconnect_frees_the_account_for_a_new_login() {
        let (shared, _world_rx) = test_shared();
        let dispatcher = client_dispatcher();

        let (mut conn, rx) = test_conn(&shared);
        login(&mut conn, &dispatcher, "AAA");
        let _: login::LoginResS2c = decode_one(&rx);

        conn.disconnect();
        assert!(!shared.logged_in.lock().contains("AAA"));

        let (mut again, again_rx) = test_conn(&shared);
        login(&mut again, &dispatcher, "AAA");
        let res: login::LoginResS2c = decode_one(&again_rx);
        assert!(res.success);
    }

    #[test]
    fn world_select_is_relayed_with_the_account_attached() {
        let (shared, world_rx) = test_shared();
        let dispatcher = client_dispatcher();
        let (mut conn, rx) = test_conn(&shared);
        login(&mut conn, &dispatcher, "AAA");
        let _: login::LoginResS2c = decode_one(&rx);

        let frame = encode_frame(&login::WorldSelectReqC2s { world_id: 1 }).unwrap();
        dispatcher.dispatch(&mut conn, packet_id::WORLD_SELECT_REQ_C2S, &frame[4..]);

        let req: world::WorldSelectReq = decode_one(&world_rx);
        assert_eq!(req.account_id, "AAA");
        assert_eq!(req.world_id, 1);
    }

    #[test]
    fn world_reply_reaches_the_requesting_client() {
        let (shared, _world_rx) = test_shared();
        let client_disp = client_dispatcher();
        let world_disp = world_dispatcher();

        let (mut conn, rx) = test_conn(&shared);
        login(&mut conn, &client_disp, "AAA");
        let _: login::LoginResS2c = decode_one(&rx);

        let frame = encode_frame(&world::WorldSelectRes {
            account_id: "AAA".to_owned(),
            success: true,
            gateway_ip: "127.0.0.1".to_owned(),
            gateway_port: 8888,
            session_token: "cafebabe".to_owned(),
        })
        .unwrap();

        let mut shared_ref = shared.clone();
        world_disp.dispatch(&mut shared_ref, packet_id::WORLD_LOGIN_SELECT_RES, &frame[4..]);

        let res: login::WorldSelectResS2c = decode_one(&rx);
        assert!(res.success);
        assert_eq!(res.gateway_ip, "127.0.0.1");
        assert_eq!(res.gateway_port, 8888);
        assert_eq!(res.session_token, "cafebabe");
    }
}
