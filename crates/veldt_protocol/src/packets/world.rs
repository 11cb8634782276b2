//! S2S packets on the Login <-> World link.

use crate::{packet_id, Decode, Encode, Packet};

#[derive(Clone, Debug, Encode, Decode, Packet)]
#[packet(id = packet_id::LOGIN_WORLD_SELECT_REQ)]
pub struct WorldSelectReq {
    pub account_id: String,
    pub world_id: u8,
}

/// The round trip is correlated by `account_id`; Login forwards the rest of
/// the fields to the client verbatim.
#[derive(Clone, Debug, Encode, Decode, Packet)]
#[packet(id = packet_id::WORLD_LOGIN_SELECT_RES)]
pub struct WorldSelectRes {
    pub account_id: String,
    pub success: bool,
    pub gateway_ip: String,
    pub gateway_port: u16,
    pub session_token: String,
}
