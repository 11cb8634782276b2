//! The wire protocol shared by every veldt service.
//!
//! Each TCP frame starts with a 4-byte little-endian header `{ size: u16,
//! id: u16 }` followed by `size - 4` bytes of payload. `size` counts the
//! whole frame, header included. The payload is the packet body encoded
//! field-by-field with [`Encode`]; the `id` selects the packet type.
//!
//! Packet ids are globally unique across the repository so that a frame
//! routed to the wrong peer class is always detectable. See [`packet_id`]
//! for the full registry.

/// Used only by macros. Not public API.
#[doc(hidden)]
pub mod __private {
    pub use anyhow::{anyhow, bail, ensure, Context, Result};

    pub use crate::{Decode, Encode, Packet};
}

// This allows us to use our own derive macros internally.
extern crate self as veldt_protocol;

pub mod decode;
pub mod dispatcher;
pub mod encode;
mod impls;
pub mod packets;

use std::io::Write;

pub use decode::{PacketDecoder, PacketFrame};
pub use dispatcher::PacketDispatcher;
pub use encode::{encode_frame, PacketEncoder};
pub use veldt_protocol_macros::{Decode, Encode, Packet};

/// The number of bytes in a frame header: `u16` size plus `u16` id.
pub const HEADER_SIZE: usize = 4;

/// The maximum number of bytes in a single frame, header included. A frame
/// announcing a larger (or smaller-than-header) size terminates the
/// connection.
pub const MAX_FRAME_SIZE: u16 = 4096;

/// Uid at which the monster range begins. Player uids are strictly below
/// this value, monster uids at or above it; broadcast assembly relies on
/// the partition to split targets.
pub const MONSTER_UID_BASE: u64 = 10_000;

/// The `Encode` trait allows objects to be written to the veldt wire
/// format. It is the inverse of [`Decode`].
///
/// Integers and floats are encoded little-endian at their natural width,
/// strings and sequences carry a `u16` length prefix, and `Option` a
/// one-byte presence tag. Components of a derived struct are encoded in
/// the order they appear in the type definition.
pub trait Encode {
    /// Writes this object to the provided writer.
    ///
    /// If this type also implements [`Decode`] then successful calls to
    /// this function returning `Ok(())` must always successfully decode
    /// using the data that was written to the writer. The exact number of
    /// bytes that were originally written must be consumed during the
    /// decoding.
    fn encode(&self, w: impl Write) -> anyhow::Result<()>;
}

/// The `Decode` trait allows objects to be read from the veldt wire
/// format. It is the inverse of [`Encode`].
///
/// `Decode` is parameterized by a lifetime. This allows the decoded value
/// to borrow data from the byte slice it was read from.
pub trait Decode<'a>: Sized {
    /// Reads this object from the provided byte slice.
    ///
    /// Implementations of `Decode` are expected to shrink the slice from
    /// the front as bytes are read.
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self>;
}

/// Types considered to be veldt packets.
///
/// The implementations of [`Encode`] and [`Decode`] on `Self` are expected
/// to only encode/decode the _body_ of the packet; the frame header is the
/// business of [`PacketEncoder`] and [`PacketDecoder`].
pub trait Packet: std::fmt::Debug {
    /// The id carried in the frame header for this packet.
    const ID: u16;
    /// The name of this packet for debugging purposes.
    const NAME: &'static str;
}

/// Decodes a packet of type `P` from a complete payload slice. An error is
/// returned if the body fails to decode or some input was missed.
pub fn decode_payload<'a, P>(mut r: &'a [u8]) -> anyhow::Result<P>
where
    P: Packet + Decode<'a>,
{
    let pkt = P::decode(&mut r)?;

    anyhow::ensure!(
        r.is_empty(),
        "missed {} bytes while decoding '{}'",
        r.len(),
        P::NAME
    );

    Ok(pkt)
}

/// The id registry. Every id is unique across the whole repository; ranges
/// are grouped per peer class. `u16::MAX` is the reserved sentinel and is
/// never a valid id.
pub mod packet_id {
    // client <-> Login
    pub const LOGIN_REQ_C2S: u16 = 1;
    pub const LOGIN_RES_S2C: u16 = 2;
    pub const WORLD_SELECT_REQ_C2S: u16 = 3;
    pub const WORLD_SELECT_RES_S2C: u16 = 4;

    // Login <-> World (S2S)
    pub const LOGIN_WORLD_SELECT_REQ: u16 = 100;
    pub const WORLD_LOGIN_SELECT_RES: u16 = 101;

    // client <-> Gateway
    pub const CONNECT_REQ_C2S: u16 = 200;
    pub const CONNECT_RES_S2C: u16 = 201;
    pub const CHAT_REQ_C2S: u16 = 202;
    pub const CHAT_RES_S2C: u16 = 203;
    pub const MOVE_REQ_C2S: u16 = 204;
    pub const MOVE_RES_S2C: u16 = 205;
    pub const ATTACK_RES_S2C: u16 = 206;

    // Gateway <-> Game (S2S)
    pub const GATEWAY_GAME_MOVE_REQ: u16 = 300;
    pub const GATEWAY_GAME_LEAVE_REQ: u16 = 301;
    pub const GAME_GATEWAY_MOVE_RES: u16 = 302;
    pub const GAME_GATEWAY_ATTACK_RES: u16 = 303;
}
