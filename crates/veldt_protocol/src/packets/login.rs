//! Packets on the client <-> Login link.

use crate::{Decode, Encode, Packet};

#[derive(Clone, Debug, Encode, Decode, Packet)]
pub struct LoginReqC2s {
    pub id: String,
    pub password: String,
}

#[derive(Copy, Clone, Debug, Encode, Decode, Packet)]
pub struct LoginResS2c {
    pub success: bool,
}

#[derive(Copy, Clone, Debug, Encode, Decode, Packet)]
pub struct WorldSelectReqC2s {
    pub world_id: u8,
}

/// Relayed outcome of the Login -> World round trip. On success the client
/// is expected to drop this connection and present `session_token` to the
/// gateway at `gateway_ip:gateway_port`.
#[derive(Clone, Debug, Encode, Decode, Packet)]
pub struct WorldSelectResS2c {
    pub success: bool,
    pub gateway_ip: String,
    pub gateway_port: u16,
    pub session_token: String,
}
