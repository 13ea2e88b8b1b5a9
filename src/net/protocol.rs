//! Wire format for pixel updates.
//!
//! Every message is a 4 byte header followed by a payload:
//!
//! ```text
//! [strand: u8][command: u8][length: u16 BE][payload: length bytes]
//! ```
//!
//! Colors are packed as `r g b`, 3 bytes each.

use byteorder::{ByteOrder, WriteBytesExt, BE};
use thiserror::Error;

use crate::color::Rgb;

pub const HEADER_SIZE: usize = 4;

/// Largest possible message: header plus a full `u16` payload.
pub const MAX_MESSAGE_SIZE: usize = HEADER_SIZE + u16::MAX as usize;

/// Payload size of a single-pixel message: 2 byte offset plus one color.
const SET_PIXEL_PAYLOAD: usize = 2 + Rgb::WIRE_SIZE;

/// Command byte of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Replace the strand from pixel 0 with as many colors as the payload holds.
    SetStrand = 0x00,
    /// Set one pixel at an explicit offset.
    SetPixel = 0x01,
}

impl TryFrom<u8> for Command {
    type Error = DecodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x00 => Ok(Command::SetStrand),
            0x01 => Ok(Command::SetPixel),
            other => Err(DecodeError::UnknownCommand(other)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message too short for header: {0} bytes")]
    IncompleteHeader(usize),

    #[error("payload truncated: header declares {declared} bytes, {available} present")]
    Truncated { declared: usize, available: usize },

    #[error("{extra} bytes after declared payload")]
    TrailingBytes { extra: usize },

    #[error("unknown command 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("color payload of {0} bytes is not a multiple of 3")]
    UnalignedColors(usize),

    #[error("single pixel payload must be 5 bytes, got {0}")]
    BadPixelPayload(usize),
}

/// A decoded message, one variant per command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    SetStrand { strand: u8, colors: Vec<Rgb> },
    SetPixel { strand: u8, offset: u16, color: Rgb },
}

/// A validated write to apply to the pixel store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    pub strand: u8,
    pub start_offset: usize,
    pub colors: Vec<Rgb>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    strand: u8,
    command: u8,
    length: usize,
}

impl Header {
    fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::IncompleteHeader(bytes.len()));
        }
        Ok(Self {
            strand: bytes[0],
            command: bytes[1],
            length: BE::read_u16(&bytes[2..HEADER_SIZE]) as usize,
        })
    }

    fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length
    }
}

impl Message {
    pub fn strand(&self) -> u8 {
        match self {
            Message::SetStrand { strand, .. } | Message::SetPixel { strand, .. } => *strand,
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Message::SetStrand { .. } => Command::SetStrand,
            Message::SetPixel { .. } => Command::SetPixel,
        }
    }

    /// Decode a payload once the header has framed it.
    fn from_parts(header: Header, payload: &[u8]) -> Result<Self, DecodeError> {
        match Command::try_from(header.command)? {
            Command::SetStrand => {
                if payload.len() % Rgb::WIRE_SIZE != 0 {
                    return Err(DecodeError::UnalignedColors(payload.len()));
                }
                Ok(Message::SetStrand {
                    strand: header.strand,
                    colors: unpack_colors(payload),
                })
            }
            Command::SetPixel => {
                if payload.len() != SET_PIXEL_PAYLOAD {
                    return Err(DecodeError::BadPixelPayload(payload.len()));
                }
                Ok(Message::SetPixel {
                    strand: header.strand,
                    offset: BE::read_u16(&payload[..2]),
                    color: Rgb::new(payload[2], payload[3], payload[4]),
                })
            }
        }
    }

    pub fn into_record(self) -> UpdateRecord {
        match self {
            Message::SetStrand { strand, colors } => UpdateRecord {
                strand,
                start_offset: 0,
                colors,
            },
            Message::SetPixel {
                strand,
                offset,
                color,
            } => UpdateRecord {
                strand,
                start_offset: offset as usize,
                colors: vec![color],
            },
        }
    }

    /// Serialize to wire bytes.
    ///
    /// A strand longer than one message can carry is cut off at the largest
    /// whole number of colors that fits.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Message::SetStrand { colors, .. } => {
                let max_colors = u16::MAX as usize / Rgb::WIRE_SIZE;
                for color in colors.iter().take(max_colors) {
                    payload.extend_from_slice(&[color.r, color.g, color.b]);
                }
            }
            Message::SetPixel { offset, color, .. } => {
                payload.extend_from_slice(&offset.to_be_bytes());
                payload.extend_from_slice(&[color.r, color.g, color.b]);
            }
        }

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        // Writing into a Vec cannot fail
        let _ = bytes.write_u8(self.strand());
        let _ = bytes.write_u8(self.command() as u8);
        let _ = bytes.write_u16::<BE>(payload.len() as u16);
        bytes.extend_from_slice(&payload);
        bytes
    }
}

fn unpack_colors(payload: &[u8]) -> Vec<Rgb> {
    payload
        .chunks_exact(Rgb::WIRE_SIZE)
        .map(|c| Rgb::new(c[0], c[1], c[2]))
        .collect()
}

/// Decode a datagram that carries exactly one message.
pub fn decode_datagram(datagram: &[u8]) -> Result<UpdateRecord, DecodeError> {
    let header = Header::parse(datagram)?;
    let available = datagram.len() - HEADER_SIZE;

    if available < header.length {
        return Err(DecodeError::Truncated {
            declared: header.length,
            available,
        });
    }
    if available > header.length {
        return Err(DecodeError::TrailingBytes {
            extra: available - header.length,
        });
    }

    Message::from_parts(header, &datagram[HEADER_SIZE..]).map(Message::into_record)
}

/// Reassembles messages from a byte stream that may split or merge them
/// arbitrarily across reads.
///
/// The header's length field always delimits a frame, so a frame that fails
/// to decode is skipped whole and the stream stays in sync.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Start of the first unconsumed frame in `buffer`
    start: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_MESSAGE_SIZE),
            start: 0,
        }
    }

    /// Append bytes received from the stream.
    ///
    /// Consumed frames are discarded here, once per read, rather than after
    /// every frame.
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Take the next complete frame, if one is buffered.
    ///
    /// Returns `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<UpdateRecord, DecodeError>> {
        let pending = &self.buffer[self.start..];
        let header = Header::parse(pending).ok()?;
        let frame_len = header.frame_len();
        if pending.len() < frame_len {
            return None;
        }

        let result =
            Message::from_parts(header, &pending[HEADER_SIZE..frame_len]).map(Message::into_record);
        self.start += frame_len;
        Some(result)
    }

    /// Bytes held waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.start
    }

    #[cfg(test)]
    fn held_bytes(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(strand: u8, command: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![strand, command];
        bytes.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_decode_set_strand() {
        let bytes = frame(2, 0x00, &[1, 2, 3, 4, 5, 6]);
        let record = decode_datagram(&bytes).unwrap();
        assert_eq!(
            record,
            UpdateRecord {
                strand: 2,
                start_offset: 0,
                colors: vec![Rgb::new(1, 2, 3), Rgb::new(4, 5, 6)],
            }
        );
    }

    #[test]
    fn test_decode_empty_set_strand() {
        let record = decode_datagram(&frame(0, 0x00, &[])).unwrap();
        assert!(record.colors.is_empty());
    }

    #[test]
    fn test_decode_set_pixel() {
        let bytes = frame(0, 0x01, &[0x01, 0x02, 255, 0, 0]);
        let record = decode_datagram(&bytes).unwrap();
        assert_eq!(record.strand, 0);
        assert_eq!(record.start_offset, 0x0102);
        assert_eq!(record.colors, vec![Rgb::new(255, 0, 0)]);
    }

    #[test]
    fn test_decode_twice_is_identical() {
        let bytes = frame(1, 0x00, &[9, 8, 7]);
        assert_eq!(decode_datagram(&bytes), decode_datagram(&bytes));
    }

    #[test]
    fn test_truncated_payload() {
        // Declares 3 colors but carries 2
        let mut bytes = vec![0, 0x00, 0, 9];
        bytes.extend_from_slice(&[1, 1, 1, 2, 2, 2]);
        assert_eq!(
            decode_datagram(&bytes),
            Err(DecodeError::Truncated {
                declared: 9,
                available: 6
            })
        );
    }

    #[test]
    fn test_malformed_datagrams() {
        assert_eq!(decode_datagram(&[0, 0]), Err(DecodeError::IncompleteHeader(2)));
        assert_eq!(
            decode_datagram(&frame(0, 0x7F, &[1, 2, 3])),
            Err(DecodeError::UnknownCommand(0x7F))
        );
        assert_eq!(
            decode_datagram(&frame(0, 0x00, &[1, 2, 3, 4])),
            Err(DecodeError::UnalignedColors(4))
        );
        assert_eq!(
            decode_datagram(&frame(0, 0x01, &[0, 1, 2, 3, 4, 5, 6, 7])),
            Err(DecodeError::BadPixelPayload(8))
        );

        let mut long = frame(0, 0x00, &[1, 2, 3]);
        long.push(0xAA);
        assert_eq!(decode_datagram(&long), Err(DecodeError::TrailingBytes { extra: 1 }));
    }

    #[test]
    fn test_short_input_reports_its_length() {
        assert_eq!(decode_datagram(&[]), Err(DecodeError::IncompleteHeader(0)));
        assert_eq!(decode_datagram(&[7, 0, 0]), Err(DecodeError::IncompleteHeader(3)));
        // A complete header with a zero length is a valid empty strand update
        assert_eq!(decode_datagram(&[7, 0, 0, 0]).unwrap().strand, 7);
        assert_eq!(
            decode_datagram(&frame(0, 0x01, &[0, 1])),
            Err(DecodeError::BadPixelPayload(2))
        );
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        let message = Message::SetPixel {
            strand: 4,
            offset: 300,
            color: Rgb::new(10, 20, 30),
        };
        assert_eq!(message.encode(), vec![4, 0x01, 0, 5, 0x01, 0x2C, 10, 20, 30]);

        let message = Message::SetStrand {
            strand: 1,
            colors: vec![Rgb::new(1, 2, 3)],
        };
        let bytes = message.encode();
        assert_eq!(bytes, vec![1, 0x00, 0, 3, 1, 2, 3]);
        assert_eq!(decode_datagram(&bytes).unwrap(), message.into_record());
    }

    #[test]
    fn test_encode_caps_oversized_strand() {
        let message = Message::SetStrand {
            strand: 0,
            colors: vec![Rgb::WHITE; 30_000],
        };
        let record = decode_datagram(&message.encode()).unwrap();
        assert_eq!(record.colors.len(), u16::MAX as usize / 3);
    }

    #[test]
    fn test_stream_reassembles_split_frames() {
        let mut stream = frame(0, 0x00, &[1, 1, 1, 2, 2, 2]);
        stream.extend(frame(0, 0x01, &[0, 1, 9, 9, 9]));

        let mut decoder = FrameDecoder::new();
        let mut records = Vec::new();
        for byte in &stream {
            decoder.extend(std::slice::from_ref(byte));
            while let Some(result) = decoder.next_frame() {
                records.push(result.unwrap());
            }
        }

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].colors.len(), 2);
        assert_eq!(records[1].start_offset, 1);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_stream_skips_bad_frame_and_stays_in_sync() {
        let mut stream = frame(0, 0x42, &[1, 2, 3, 4]);
        stream.extend(frame(0, 0x00, &[1, 2]));
        stream.extend(frame(3, 0x00, &[7, 7, 7]));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);

        assert_eq!(decoder.next_frame(), Some(Err(DecodeError::UnknownCommand(0x42))));
        assert_eq!(decoder.next_frame(), Some(Err(DecodeError::UnalignedColors(2))));
        let record = decoder.next_frame().unwrap().unwrap();
        assert_eq!(record.strand, 3);
        assert_eq!(record.colors, vec![Rgb::new(7, 7, 7)]);
        assert_eq!(decoder.next_frame(), None);
    }

    #[test]
    fn test_stream_waits_for_declared_length() {
        let bytes = frame(0, 0x00, &[5; 9]);
        let mut decoder = FrameDecoder::new();

        decoder.extend(&bytes[..8]);
        assert_eq!(decoder.next_frame(), None);
        assert_eq!(decoder.buffered(), 8);

        decoder.extend(&bytes[8..]);
        assert_eq!(decoder.next_frame().unwrap().unwrap().colors.len(), 3);
    }

    #[test]
    fn test_stream_compacts_once_per_read() {
        let mut stream = Vec::new();
        for i in 0..1000u16 {
            stream.extend(frame(0, 0x01, &[(i >> 8) as u8, i as u8, 1, 2, 3]));
        }
        let tail = frame(1, 0x00, &[4, 5, 6]);
        stream.extend_from_slice(&tail[..2]);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        let mut offsets = Vec::new();
        while let Some(result) = decoder.next_frame() {
            offsets.push(result.unwrap().start_offset);
        }

        assert_eq!(offsets.len(), 1000);
        assert_eq!(offsets[999], 999);
        assert_eq!(decoder.buffered(), 2);
        // Consumed frames stay in place until the next read
        assert_eq!(decoder.held_bytes(), stream.len());

        decoder.extend(&tail[2..]);
        assert_eq!(decoder.held_bytes(), tail.len());
        assert_eq!(decoder.next_frame().unwrap().unwrap().strand, 1);
        assert_eq!(decoder.buffered(), 0);
    }
}
