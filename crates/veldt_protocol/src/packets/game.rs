//! S2S packets on the Gateway <-> Game link.
//!
//! Downstream packets carry an explicit `target_account_ids` list built by
//! the simulation's AOI query. The list is authoritative: the gateway fans
//! the event out to exactly those sessions and does no AOI math of its own.

use crate::{packet_id, Decode, Encode, Packet};

#[derive(Clone, Debug, Encode, Decode, Packet)]
#[packet(id = packet_id::GATEWAY_GAME_MOVE_REQ)]
pub struct MoveReq {
    pub account_id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
}

/// Sent when the client socket behind `account_id` closes so the
/// simulation can evict the entity. Unknown accounts are a no-op.
#[derive(Clone, Debug, Encode, Decode, Packet)]
#[packet(id = packet_id::GATEWAY_GAME_LEAVE_REQ)]
pub struct LeaveReq {
    pub account_id: String,
}

#[derive(Clone, Debug, Encode, Decode, Packet)]
#[packet(id = packet_id::GAME_GATEWAY_MOVE_RES)]
pub struct MoveRes {
    pub account_id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
    pub target_account_ids: Vec<String>,
}

#[derive(Clone, Debug, Encode, Decode, Packet)]
#[packet(id = packet_id::GAME_GATEWAY_ATTACK_RES)]
pub struct AttackRes {
    pub attacker_uid: u64,
    pub target_uid: u64,
    pub target_account_id: String,
    pub damage: i32,
    pub target_remain_hp: i32,
    pub target_account_ids: Vec<String>,
}
