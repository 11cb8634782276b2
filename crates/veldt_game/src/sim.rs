//! The single-writer simulation.
//!
//! Everything in [`Sim`] (the player tables, the zone grid and the
//! monster set) is owned by one task and mutated only from it. S2S frames
//! and the AI tick are multiplexed onto that task by the caller, so the
//! order of events is exactly the order they were enqueued and no lock
//! guards any of this state.
//!
//! Downstream traffic goes through [`GatewayLink`]: packets are encoded
//! into frames here and pushed onto the gateway connection's serialized
//! write queue. Every broadcast carries the explicit recipient list built
//! from the zone's AOI query; if the list would be empty the packet is not
//! sent at all.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use glam::Vec3;
use tracing::{debug, info, warn};
use veldt_nav::NavMesh;
use veldt_protocol::packets::game;
use veldt_protocol::{
    decode_payload, encode_frame, packet_id, Encode, Packet, PacketDispatcher, MONSTER_UID_BASE,
};
use veldt_zone::Zone;

use crate::monster::{AttackEvent, Monster, MonsterStats, MOVE_EPSILON, NETWORK_SYNC_INTERVAL};

pub(crate) const PLAYER_MAX_HP: i32 = 100;

/// Where players respawn after death.
const RESPAWN_POS: Vec3 = Vec3::ZERO;

pub(crate) struct PlayerInfo {
    pub(crate) uid: u64,
    pub(crate) pos: Vec3,
    pub(crate) yaw: f32,
    pub(crate) hp: i32,
}

/// Read-only view of the world handed to each monster during its tick.
pub(crate) struct WorldView<'a> {
    pub(crate) zone: &'a Zone,
    pub(crate) accounts: &'a HashMap<String, PlayerInfo>,
    pub(crate) uid_to_account: &'a HashMap<u64, String>,
}

impl WorldView<'_> {
    pub(crate) fn player_pos(&self, uid: u64) -> Option<Vec3> {
        let account = self.uid_to_account.get(&uid)?;
        Some(self.accounts.get(account)?.pos)
    }
}

/// The write end of the S2S connection to the gateway. Encoding errors and
/// a closed link are logged and the packet discarded; reconnection is the
/// network layer's business.
#[derive(Default)]
pub(crate) struct GatewayLink {
    tx: Option<flume::Sender<BytesMut>>,
}

impl GatewayLink {
    pub(crate) fn detached() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&mut self, tx: flume::Sender<BytesMut>) {
        if self.tx.is_some() {
            warn!("replacing an existing gateway link");
        }
        self.tx = Some(tx);
    }

    pub(crate) fn detach(&mut self) {
        self.tx = None;
    }

    pub(crate) fn send_packet<P>(&self, pkt: &P)
    where
        P: Packet + Encode,
    {
        let Some(tx) = &self.tx else {
            debug!("dropping '{}': no gateway attached", P::NAME);
            return;
        };

        match encode_frame(pkt) {
            Ok(bytes) => {
                if tx.send(bytes).is_err() {
                    debug!("dropping '{}': gateway link closed", P::NAME);
                }
            }
            Err(e) => warn!("failed to encode '{}': {e:#}", P::NAME),
        }
    }
}

pub(crate) struct Sim {
    accounts: HashMap<String, PlayerInfo>,
    uid_to_account: HashMap<u64, String>,
    zone: Zone,
    monsters: Vec<Monster>,
    nav: Arc<NavMesh>,
    next_player_uid: u64,
    link: GatewayLink,
}

impl Sim {
    pub(crate) fn new(zone: Zone, nav: Arc<NavMesh>) -> Self {
        Self {
            accounts: HashMap::new(),
            uid_to_account: HashMap::new(),
            zone,
            monsters: Vec::new(),
            nav,
            next_player_uid: 1,
            link: GatewayLink::detached(),
        }
    }

    pub(crate) fn attach_gateway(&mut self, tx: flume::Sender<BytesMut>) {
        self.link.attach(tx);
    }

    pub(crate) fn detach_gateway(&mut self) {
        self.link.detach();
    }

    pub(crate) fn spawn_monster(&mut self, spawn: Vec3, stats: MonsterStats) -> u64 {
        let uid = MONSTER_UID_BASE + self.monsters.len() as u64;

        self.monsters
            .push(Monster::new(uid, spawn, stats, self.nav.clone()));
        self.zone.enter(uid, spawn.x, spawn.y);

        info!(uid, x = spawn.x, y = spawn.y, "spawned monster");

        uid
    }

    /// First contact with an unseen account creates the player entity;
    /// later moves maintain its position and the grid.
    pub(crate) fn handle_move_req(&mut self, pkt: game::MoveReq) {
        let game::MoveReq {
            account_id,
            x,
            y,
            z,
            yaw,
        } = pkt;

        match self.accounts.get_mut(&account_id) {
            Some(info) => {
                self.zone
                    .update_position(info.uid, info.pos.x, info.pos.y, x, y);
                info.pos = Vec3::new(x, y, z);
                info.yaw = yaw;
            }
            None => {
                let uid = self.alloc_player_uid();

                self.accounts.insert(
                    account_id.clone(),
                    PlayerInfo {
                        uid,
                        pos: Vec3::new(x, y, z),
                        yaw,
                        hp: PLAYER_MAX_HP,
                    },
                );
                self.uid_to_account.insert(uid, account_id.clone());
                self.zone.enter(uid, x, y);

                info!(account = %account_id, uid, "player entered the world");
            }
        }

        let targets = aoi_account_ids(&self.zone, &self.uid_to_account, x, y);

        if !targets.is_empty() {
            self.link.send_packet(&game::MoveRes {
                account_id,
                x,
                y,
                z,
                yaw,
                target_account_ids: targets,
            });
        }
    }

    /// Eviction on client disconnect. Unknown accounts are a no-op so a
    /// stale `LeaveReq` cannot hurt.
    pub(crate) fn handle_leave_req(&mut self, pkt: game::LeaveReq) {
        let Some(info) = self.accounts.remove(&pkt.account_id) else {
            return;
        };

        self.zone.leave(info.uid, info.pos.x, info.pos.y);
        self.uid_to_account.remove(&info.uid);

        info!(account = %pkt.account_id, uid = info.uid, "player left the world");
    }

    /// One simulation tick: every monster advances its FSM and kinematics,
    /// the grid tracks whoever actually moved, and due position syncs and
    /// attack effects go out in the order they were produced.
    pub(crate) fn tick(&mut self, dt: f32) {
        let Self {
            accounts,
            uid_to_account,
            zone,
            monsters,
            link,
            ..
        } = self;

        for monster in monsters.iter_mut() {
            let old_pos = monster.pos;

            let attack = {
                let view = WorldView {
                    zone,
                    accounts,
                    uid_to_account,
                };
                monster.update(dt, &view)
            };

            let delta = monster.pos - old_pos;

            if delta.x.abs() > MOVE_EPSILON || delta.y.abs() > MOVE_EPSILON {
                zone.update_position(
                    monster.uid,
                    old_pos.x,
                    old_pos.y,
                    monster.pos.x,
                    monster.pos.y,
                );

                monster.sync_timer += dt;

                if monster.sync_timer >= NETWORK_SYNC_INTERVAL {
                    monster.sync_timer = 0.0;

                    let targets =
                        aoi_account_ids(zone, uid_to_account, monster.pos.x, monster.pos.y);

                    if !targets.is_empty() {
                        link.send_packet(&game::MoveRes {
                            account_id: format!("MONSTER_{}", monster.uid),
                            x: monster.pos.x,
                            y: monster.pos.y,
                            z: monster.pos.z,
                            yaw: monster.yaw,
                            target_account_ids: targets,
                        });
                    }
                }
            }

            if let Some(event) = attack {
                apply_attack(accounts, uid_to_account, zone, link, event);
            }
        }
    }

    fn alloc_player_uid(&mut self) -> u64 {
        let uid = self.next_player_uid;
        assert!(uid < MONSTER_UID_BASE, "player uid space exhausted");

        self.next_player_uid += 1;
        uid
    }
}

/// Builds the recipient list for an event at `(x, y)`: the account ids of
/// every *player* in the AOI. Monsters in the AOI are seen by the query
/// but never become recipients.
fn aoi_account_ids(
    zone: &Zone,
    uid_to_account: &HashMap<u64, String>,
    x: f32,
    y: f32,
) -> Vec<String> {
    zone.players_in_aoi(x, y)
        .into_iter()
        .filter(|&uid| uid < MONSTER_UID_BASE)
        .filter_map(|uid| uid_to_account.get(&uid).cloned())
        .collect()
}

/// Applies one landed swing: damage first (broadcast to the victim's AOI),
/// then, on death, the respawn teleport addressed to the victim alone. The
/// hp restore and the grid move are a single uninterrupted step on the
/// simulation task.
fn apply_attack(
    accounts: &mut HashMap<String, PlayerInfo>,
    uid_to_account: &HashMap<u64, String>,
    zone: &mut Zone,
    link: &GatewayLink,
    event: AttackEvent,
) {
    let Some(account_id) = uid_to_account.get(&event.target_uid) else {
        return; // target left between the swing and now
    };
    let Some(info) = accounts.get_mut(account_id) else {
        return;
    };

    info.hp = (info.hp - event.damage).max(0);

    let targets = aoi_account_ids(zone, uid_to_account, info.pos.x, info.pos.y);

    if !targets.is_empty() {
        link.send_packet(&game::AttackRes {
            attacker_uid: event.attacker_uid,
            target_uid: event.target_uid,
            target_account_id: account_id.clone(),
            damage: event.damage,
            target_remain_hp: info.hp,
            target_account_ids: targets,
        });
    }

    if info.hp == 0 {
        info!(account = %account_id, "player died, respawning");

        zone.update_position(info.uid, info.pos.x, info.pos.y, RESPAWN_POS.x, RESPAWN_POS.y);
        info.pos = RESPAWN_POS;
        info.hp = PLAYER_MAX_HP;

        link.send_packet(&game::MoveRes {
            account_id: account_id.clone(),
            x: RESPAWN_POS.x,
            y: RESPAWN_POS.y,
            z: RESPAWN_POS.z,
            yaw: info.yaw,
            target_account_ids: vec![account_id.clone()],
        });
    }
}

/// The Game process's S2S dispatch table.
pub(crate) fn s2s_dispatcher() -> PacketDispatcher<Sim> {
    let mut dispatcher = PacketDispatcher::new();

    dispatcher.register(packet_id::GATEWAY_GAME_MOVE_REQ, |sim: &mut Sim, payload| {
        sim.handle_move_req(decode_payload(payload)?);
        Ok(())
    });

    dispatcher.register(packet_id::GATEWAY_GAME_LEAVE_REQ, |sim: &mut Sim, payload| {
        sim.handle_leave_req(decode_payload(payload)?);
        Ok(())
    });

    dispatcher
}
