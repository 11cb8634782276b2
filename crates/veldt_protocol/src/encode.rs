use anyhow::ensure;
use bytes::{BufMut, BytesMut};

use crate::{Encode, Packet, HEADER_SIZE, MAX_FRAME_SIZE};

/// Encodes framed packets into an internal buffer.
#[derive(Default)]
pub struct PacketEncoder {
    buf: BytesMut,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_packet<P>(&mut self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        let start_len = self.buf.len();

        // Reserve space for the header, then patch it once the body length
        // is known.
        self.buf.put_bytes(0, HEADER_SIZE);

        pkt.encode((&mut self.buf).writer())?;

        let frame_len = self.buf.len() - start_len;

        ensure!(
            frame_len <= MAX_FRAME_SIZE as usize,
            "packet '{}' exceeds maximum frame length (got {frame_len})",
            P::NAME
        );

        let header = &mut self.buf[start_len..];
        header[..2].copy_from_slice(&(frame_len as u16).to_le_bytes());
        header[2..4].copy_from_slice(&P::ID.to_le_bytes());

        Ok(())
    }

    /// Takes all the frames written so far.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Encodes a single packet as one complete frame.
pub fn encode_frame<P>(pkt: &P) -> anyhow::Result<BytesMut>
where
    P: Packet + Encode,
{
    let mut enc = PacketEncoder::new();
    enc.append_packet(pkt)?;
    Ok(enc.take())
}
