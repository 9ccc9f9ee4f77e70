use smoltcp::wire::{
    Ieee802154Address, Ieee802154Frame, Ieee802154FrameType, Ieee802154FrameVersion,
    Ieee802154Pan, Ieee802154Repr,
};

use crate::Error;

/// Marks a frame as belonging to the link layer
pub const LINK_TAG: [u8; 4] = *b"LWIP";

/// Largest standard frame, FCS included
pub const MAX_FRAME_LEN: usize = 127;

/// Length of the frame check sequence the DW1000 appends
pub const FCS_LEN: usize = 2;

/// Addressing of an outgoing link frame
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkHeader {
    /// MAC sequence number
    pub sequence: u8,
    /// PAN both ends are on
    pub pan_id: u16,
    /// Our short address
    pub source: u16,
    /// Peer short address, broadcast if `None`
    pub destination: Option<u16>,
}

/// A received link frame
#[derive(Debug, Eq, PartialEq)]
pub struct LinkFrame<'a> {
    /// MAC sequence number, if present
    pub sequence: Option<u8>,
    /// Sender short address, if present
    pub source: Option<u16>,
    /// The bytes after the link tag
    pub payload: &'a [u8],
}

fn short(addr: u16) -> Ieee802154Address {
    Ieee802154Address::Short(addr.to_be_bytes())
}

/// Write the MAC header, the link tag and `payload` to `buffer`
///
/// Returns the frame length without the FCS, which the DW1000 appends.
pub fn encode_frame<E>(
    buffer: &mut [u8],
    header: &LinkHeader,
    payload: &[u8],
) -> Result<usize, Error<E>> {
    let repr = Ieee802154Repr {
        frame_type: Ieee802154FrameType::Data,
        frame_version: Ieee802154FrameVersion::Ieee802154_2006,
        security_enabled: false,
        sequence_number: Some(header.sequence),
        frame_pending: false,
        ack_request: false,
        pan_id_compression: true,
        dst_addr: Some(header.destination.map_or(Ieee802154Address::BROADCAST, short)),
        src_addr: Some(short(header.source)),
        src_pan_id: Some(Ieee802154Pan(header.pan_id)),
        dst_pan_id: Some(Ieee802154Pan(header.pan_id)),
    };

    let header_len = repr.buffer_len();
    let len = header_len + LINK_TAG.len() + payload.len();
    if len + FCS_LEN > MAX_FRAME_LEN || len > buffer.len() {
        return Err(Error::BufferTooSmall {
            required_len: len + FCS_LEN,
        });
    }

    let mut frame = Ieee802154Frame::new_unchecked(&mut buffer[..header_len]);
    repr.emit(&mut frame);

    buffer[header_len..header_len + LINK_TAG.len()].copy_from_slice(&LINK_TAG);
    buffer[header_len + LINK_TAG.len()..len].copy_from_slice(payload);

    Ok(len)
}

/// Parse a received frame, FCS already stripped
///
/// Returns `None` if the MAC header is malformed or the link tag is missing.
pub fn decode_frame(bytes: &[u8]) -> Option<LinkFrame<'_>> {
    let frame = Ieee802154Frame::new_checked(bytes).ok()?;
    let body = frame.payload()?;

    if body.len() < LINK_TAG.len() || body[..LINK_TAG.len()] != LINK_TAG {
        return None;
    }

    let source = match frame.src_addr() {
        Some(Ieee802154Address::Short(addr)) => Some(u16::from_be_bytes(addr)),
        _ => None,
    };

    Some(LinkFrame {
        sequence: frame.sequence_number(),
        source,
        payload: &body[LINK_TAG.len()..],
    })
}
