//! Fixed-size frame encoder/decoder for the USB link.
//!
//! Every packet on the wire is exactly [`FRAME_SIZE`] bytes:
//!
//! ```text
//! byte 0      sync marker (0x69)
//! byte 1      command identifier
//! byte 2      status byte (0 on requests, device-assigned on answers)
//! byte 3      payload length (0..=58)
//! bytes 4..62 payload, zero-padded to fill the frame
//! bytes 62..64 CRC-16/CCITT-FALSE over bytes 0..62, little-endian
//! ```
//!
//! Decoding is deliberately unforgiving: anything that is not a full,
//! sync-correct, checksum-correct frame yields `None` and the caller drops
//! the read on the floor. No resynchronization inside a partial frame is
//! attempted -- on a full-speed USB CDC link a torn read is rare transient
//! noise and the device will retransmit at the application layer if it
//! cares.

use bytes::{BufMut, BytesMut};
use crc::{CRC_16_IBM_3740, Crc};

use esb_bridge_core::error::{Error, Result};

/// Total size of every packet on the wire.
pub const FRAME_SIZE: usize = 64;

/// Sync byte marking the beginning of a packet.
pub const SYNC: u8 = 0x69;

/// Frame header length: sync, command, status, payload length.
const HEADER_LEN: usize = 4;

/// CRC trailer length.
const CRC_LEN: usize = 2;

/// Maximum payload length of a single frame (64 byte packet - 4 byte
/// header - 2 byte CRC).
pub const MAX_PAYLOAD_LEN: usize = FRAME_SIZE - HEADER_LEN - CRC_LEN;

/// Test command. Echoed by the firmware; used by the link tests only.
pub const CMD_TEST: u8 = 0x61;

/// Interrupt callback command, device-to-host only.
pub const CMD_IRQ: u8 = 0x80;

/// Radio receive callback: carries an asynchronous inbound ESB message
/// from a radio peer. Device-to-host only; never used as a request
/// command, since an answer and a callback with the same identifier
/// could not be told apart.
pub const CMD_RX: u8 = 0x81;

const IDX_SYNC: usize = 0;
const IDX_CMD: usize = 1;
const IDX_STATUS: usize = 2;
const IDX_LEN: usize = 3;
const IDX_PAYLOAD: usize = 4;

/// CRC-16/CCITT-FALSE, the algorithm the bridge firmware computes over
/// bytes 0..62 of every frame.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// A decoded link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command identifier.
    pub cmd: u8,
    /// Status byte. Zero on requests; on answers, zero means success and
    /// any other value is a firmware-reported error code.
    pub status: u8,
    /// Payload with the zero padding stripped.
    pub payload: Vec<u8>,
}

/// Compute the frame checksum over `bytes`.
pub fn checksum(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// Encode a request frame: status byte zero, payload zero-padded, CRC
/// trailer appended.
///
/// Fails with [`Error::InvalidSize`] if `payload` exceeds
/// [`MAX_PAYLOAD_LEN`].
///
/// # Example
///
/// ```
/// use esb_bridge_usb::frame::{encode_frame, FRAME_SIZE, SYNC};
///
/// let bytes = encode_frame(0x10, &[]).unwrap();
/// assert_eq!(bytes.len(), FRAME_SIZE);
/// assert_eq!(bytes[0], SYNC);
/// assert_eq!(bytes[1], 0x10);
/// ```
pub fn encode_frame(cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
    encode_answer_frame(cmd, 0, payload)
}

/// Encode a frame with an explicit status byte.
///
/// The host only ever sends status zero; this form exists so tests and
/// tooling can fabricate device-side answer frames.
pub fn encode_answer_frame(cmd: u8, status: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::InvalidSize);
    }

    let mut buf = BytesMut::with_capacity(FRAME_SIZE);
    buf.put_u8(SYNC);
    buf.put_u8(cmd);
    buf.put_u8(status);
    buf.put_u8(payload.len() as u8);
    buf.put_slice(payload);
    buf.resize(FRAME_SIZE - CRC_LEN, 0);
    let crc = CRC16.checksum(&buf);
    buf.put_u16_le(crc);

    Ok(buf.to_vec())
}

/// Attempt to decode one frame from a received buffer.
///
/// Returns `None` -- and the caller must silently discard the read -- when
/// the buffer is not exactly one frame long, the sync byte is wrong, the
/// payload length field is out of range, or the CRC trailer does not match
/// a recomputation over the received bytes.
pub fn decode_frame(buf: &[u8]) -> Option<Frame> {
    if buf.len() != FRAME_SIZE {
        return None;
    }
    if buf[IDX_SYNC] != SYNC {
        return None;
    }

    let crc_calc = CRC16.checksum(&buf[..FRAME_SIZE - CRC_LEN]);
    let crc_rx = u16::from_le_bytes([buf[FRAME_SIZE - 2], buf[FRAME_SIZE - 1]]);
    if crc_calc != crc_rx {
        return None;
    }

    let payload_len = buf[IDX_LEN] as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return None;
    }

    Some(Frame {
        cmd: buf[IDX_CMD],
        status: buf[IDX_STATUS],
        payload: buf[IDX_PAYLOAD..IDX_PAYLOAD + payload_len].to_vec(),
    })
}
