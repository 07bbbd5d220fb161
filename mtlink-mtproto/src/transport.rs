//! Transport framing codecs.
//!
//! These turn MTProto packets into stream bytes and back, without touching a
//! socket. The async transport reads a header, asks the codec how many more
//! bytes follow, reads them, and hands everything back for decoding.
//!
//! | Kind           | Init bytes   | Frame                                        |
//! |----------------|--------------|----------------------------------------------|
//! | [Abridged]     | `0xef`       | `len/4` (1 or 4 bytes) ‖ payload             |
//! | [Intermediate] | `0xeeeeeeee` | `len` (4 bytes LE) ‖ payload                 |
//! | [Full]         | none         | `total_len` ‖ `seq` ‖ payload ‖ `crc32`      |
//!
//! [Abridged]: https://core.telegram.org/mtproto/mtproto-transports#abridged
//! [Intermediate]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
//! [Full]: https://core.telegram.org/mtproto/mtproto-transports#full

/// Which framing a connection speaks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Framing {
    /// One-byte length prefix for short packets.
    #[default]
    Abridged,
    /// Four-byte length prefix.
    Intermediate,
    /// Length, sequence number and CRC-32 around every packet.
    Full,
}

impl Framing {
    /// Bytes announcing the framing at the start of a plain connection.
    pub fn init_bytes(self) -> &'static [u8] {
        match self {
            Framing::Abridged => &[0xef],
            Framing::Intermediate => &[0xee; 4],
            Framing::Full => &[],
        }
    }

    /// Tag announcing the framing inside an obfuscated header.
    ///
    /// Full framing cannot be obfuscated; `None` is returned for it.
    pub fn obfuscation_tag(self) -> Option<[u8; 4]> {
        match self {
            Framing::Abridged => Some([0xef; 4]),
            Framing::Intermediate => Some([0xee; 4]),
            Framing::Full => None,
        }
    }
}

/// A frame that cannot be decoded. The stream is unusable afterwards.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameError {
    /// A length field outside what the framing allows.
    BadLength(usize),
    /// The Full-framing checksum did not match.
    Crc {
        /// Checksum carried by the frame.
        expected: u32,
        /// Checksum computed locally.
        actual: u32,
    },
    /// The Full-framing sequence number skipped or repeated.
    Seq {
        /// Sequence number we expected.
        expected: u32,
        /// Sequence number carried by the frame.
        got: u32,
    },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadLength(n) => write!(f, "invalid frame length {n}"),
            Self::Crc { expected, actual } => {
                write!(f, "crc mismatch (got {actual:#010x}, expected {expected:#010x})")
            }
            Self::Seq { expected, got } => write!(f, "sequence mismatch (expected {expected}, got {got})"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Per-connection framing state.
#[derive(Debug)]
pub struct Codec {
    framing: Framing,
    send_seq: u32,
    recv_seq: u32,
}

impl Codec {
    /// A codec at the start of a connection.
    pub fn new(framing: Framing) -> Self {
        Self { framing, send_seq: 0, recv_seq: 0 }
    }

    /// The framing in use.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Frame an outbound packet.
    pub fn encode(&mut self, payload: &[u8]) -> Vec<u8> {
        match self.framing {
            Framing::Abridged => {
                let words = payload.len() / 4;
                let mut out = Vec::with_capacity(4 + payload.len());
                if words < 0x7f {
                    out.push(words as u8);
                } else {
                    out.push(0x7f);
                    out.extend_from_slice(&(words as u32).to_le_bytes()[..3]);
                }
                out.extend_from_slice(payload);
                out
            }
            Framing::Intermediate => {
                let mut out = Vec::with_capacity(4 + payload.len());
                out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                out.extend_from_slice(payload);
                out
            }
            Framing::Full => {
                let total_len = (payload.len() + 12) as u32;
                let mut out = Vec::with_capacity(total_len as usize);
                out.extend_from_slice(&total_len.to_le_bytes());
                out.extend_from_slice(&self.send_seq.to_le_bytes());
                out.extend_from_slice(payload);
                out.extend_from_slice(&crc32(&out).to_le_bytes());
                self.send_seq = self.send_seq.wrapping_add(1);
                out
            }
        }
    }

    /// Size of the fixed header that starts every inbound frame.
    pub fn header_len(&self) -> usize {
        match self.framing {
            Framing::Abridged => 1,
            Framing::Intermediate | Framing::Full => 4,
        }
    }

    /// Extra header bytes announced by the fixed header (abridged long form).
    pub fn extended_header_len(&self, head: &[u8]) -> usize {
        match self.framing {
            Framing::Abridged if head.first().is_some_and(|b| b & 0x7f == 0x7f) => 3,
            _ => 0,
        }
    }

    /// Bytes that follow the complete header.
    pub fn body_len(&self, header: &[u8]) -> Result<usize, FrameError> {
        match self.framing {
            Framing::Abridged => {
                let words = match header {
                    [b] => usize::from(b & 0x7f),
                    [_, a, b, c] => usize::from(*a) | usize::from(*b) << 8 | usize::from(*c) << 16,
                    _ => return Err(FrameError::BadLength(header.len())),
                };
                Ok(words * 4)
            }
            Framing::Intermediate => Ok(le_u32(header) as usize),
            Framing::Full => {
                let total = le_u32(header) as usize;
                if total < 12 {
                    return Err(FrameError::BadLength(total));
                }
                Ok(total - 4)
            }
        }
    }

    /// Recover the packet from a complete header and body.
    pub fn decode(&mut self, header: &[u8], mut body: Vec<u8>) -> Result<Vec<u8>, FrameError> {
        if self.framing != Framing::Full {
            return Ok(body);
        }
        if body.len() < 8 {
            return Err(FrameError::BadLength(body.len() + header.len()));
        }
        let crc_at = body.len() - 4;
        let expected = le_u32(&body[crc_at..]);
        let mut checked = Vec::with_capacity(header.len() + crc_at);
        checked.extend_from_slice(header);
        checked.extend_from_slice(&body[..crc_at]);
        let actual = crc32(&checked);
        if actual != expected {
            return Err(FrameError::Crc { expected, actual });
        }

        let got = le_u32(&body[..4]);
        if got != self.recv_seq {
            return Err(FrameError::Seq { expected: self.recv_seq, got });
        }
        self.recv_seq = self.recv_seq.wrapping_add(1);

        body.truncate(crc_at);
        body.drain(..4);
        Ok(body)
    }
}

fn le_u32(b: &[u8]) -> u32 {
    let mut w = [0u8; 4];
    w.copy_from_slice(&b[..4]);
    u32::from_le_bytes(w)
}

/// CRC-32 with the IEEE 802.3 polynomial.
pub fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0xedb88320;
    let mut crc: u32 = 0xffffffff;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (POLY & mask);
        }
    }
    !crc
}

/// Negated error code carried by a 4-byte transport error frame.
pub fn transport_error_code(packet: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = packet.try_into().ok()?;
    Some(i32::from_le_bytes(bytes).wrapping_neg())
}
