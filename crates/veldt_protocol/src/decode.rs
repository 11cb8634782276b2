use anyhow::ensure;
use bytes::{Buf, BytesMut};

use crate::{Decode, Packet, HEADER_SIZE, MAX_FRAME_SIZE};

/// Reassembles frames from a TCP byte stream.
///
/// Bytes read off the socket are queued with [`queue_bytes`] or
/// [`queue_slice`]; [`try_next_frame`] yields complete frames as they
/// become available. A frame whose announced size is outside
/// `HEADER_SIZE..=MAX_FRAME_SIZE` is a hard error and the caller is
/// expected to drop the connection.
///
/// [`queue_bytes`]: Self::queue_bytes
/// [`queue_slice`]: Self::queue_slice
/// [`try_next_frame`]: Self::try_next_frame
#[derive(Default)]
pub struct PacketDecoder {
    buf: BytesMut,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_next_frame(&mut self) -> anyhow::Result<Option<PacketFrame>> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let size = u16::from_le_bytes([self.buf[0], self.buf[1]]);
        let id = u16::from_le_bytes([self.buf[2], self.buf[3]]);

        ensure!(
            (HEADER_SIZE as u16..=MAX_FRAME_SIZE).contains(&size),
            "frame length of {size} is out of bounds"
        );

        if self.buf.len() < size as usize {
            // Not enough data arrived yet.
            return Ok(None);
        }

        self.buf.advance(HEADER_SIZE);
        let body = self.buf.split_to(size as usize - HEADER_SIZE);

        Ok(Some(PacketFrame { id, body }))
    }

    pub fn queue_bytes(&mut self, bytes: BytesMut) {
        self.buf.unsplit(bytes);
    }

    pub fn queue_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn take_capacity(&mut self) -> BytesMut {
        self.buf.split_off(self.buf.len())
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }
}

/// A complete frame with the header stripped.
#[derive(Clone, Debug)]
pub struct PacketFrame {
    /// The id of the decoded frame.
    pub id: u16,
    /// The contents of the frame after the header.
    pub body: BytesMut,
}

impl PacketFrame {
    /// Attempts to decode this frame as a packet of type `P`. An error is
    /// returned if the packet id does not match, the body of the packet
    /// failed to decode, or some input was missed.
    pub fn decode<'a, P>(&'a self) -> anyhow::Result<P>
    where
        P: Packet + Decode<'a>,
    {
        ensure!(
            P::ID == self.id,
            "packet id mismatch while decoding '{}': expected {}, got {}",
            P::NAME,
            P::ID,
            self.id
        );

        crate::decode_payload(&self.body[..])
    }
}
