//! Packets on the client <-> Gateway link.

use crate::{Decode, Encode, Packet};

#[derive(Clone, Debug, Encode, Decode, Packet)]
pub struct ConnectReqC2s {
    pub account_id: String,
    pub session_token: String,
}

#[derive(Copy, Clone, Debug, Encode, Decode, Packet)]
pub struct ConnectResS2c {
    pub success: bool,
}

#[derive(Clone, Debug, Encode, Decode, Packet)]
pub struct ChatReqC2s {
    pub msg: String,
}

/// Chat is world-wide: the gateway fans this out to every connected
/// session, not to an AOI subset.
#[derive(Clone, Debug, Encode, Decode, Packet)]
pub struct ChatResS2c {
    pub account_id: String,
    pub msg: String,
}

#[derive(Copy, Clone, Debug, Encode, Decode, Packet)]
pub struct MoveReqC2s {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
}

#[derive(Clone, Debug, Encode, Decode, Packet)]
pub struct MoveResS2c {
    pub account_id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
}

#[derive(Clone, Debug, Encode, Decode, Packet)]
pub struct AttackResS2c {
    pub attacker_uid: u64,
    pub target_account_id: String,
    pub damage: i32,
    pub target_remain_hp: i32,
}
