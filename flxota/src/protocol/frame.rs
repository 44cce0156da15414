//! Wire packet grammar shared by both transfer roles.
//!
//! Every packet starts with the ASCII tag `FLX`. Control packets follow it
//! with `?`, data packets with a colon-delimited decimal sequence number:
//!
//! ```text
//! Control request:       FLX?
//! Control request (EOF): FLX?EOF
//! Handshake ACK:         FLX?OK         or  FLX?NOK:<reason>
//! Data packet:           FLX:<seq>:<payload bytes>
//! Data ACK:              FLX:<seq>:OK
//! ```
//!
//! `<seq>` is 1-4 decimal digits. The same grammar frames the host-side
//! serial line protocol, so all parsing here operates on raw byte slices.

/// ASCII packet tag.
pub const TAG: &[u8] = b"FLX";

/// Control request opening a transfer session.
pub const HANDSHAKE: &[u8] = b"FLX?";

/// Control request signaling end-of-file.
pub const HANDSHAKE_EOF: &[u8] = b"FLX?EOF";

/// Positive handshake acknowledgment.
pub const HANDSHAKE_OK: &[u8] = b"FLX?OK";

/// Prefix of a negative handshake acknowledgment.
pub const HANDSHAKE_NOK_PREFIX: &[u8] = b"FLX?NOK:";

/// Maximum number of decimal digits in a sequence number.
pub const MAX_SEQ_DIGITS: usize = 4;

/// Highest sequence number representable in [`MAX_SEQ_DIGITS`] digits.
pub const MAX_SEQ: u16 = 9999;

/// Maximum radio payload, in bytes, the transport is assumed to carry.
///
/// Bounds every packet built here: `FLX:<seq>:` plus up to 16 decoded
/// record bytes stays well under this.
pub const MAX_PACKET: usize = 61;

/// A classified inbound packet.
#[derive(Debug, PartialEq, Eq)]
pub enum PacketView<'a> {
    /// `FLX?` - transfer request (or a lost-ACK handshake re-request).
    Handshake,
    /// `FLX?EOF` - end-of-file control request.
    HandshakeEof,
    /// `FLX:<seq>:<body>` - a data packet.
    Data {
        /// Parsed sequence number.
        seq: u16,
        /// Payload bytes after the second colon.
        body: &'a [u8],
    },
}

/// Classify a raw packet payload.
///
/// Returns `None` for anything that is not well-formed under the grammar,
/// including data packets with an empty or unterminated sequence field.
/// Malformed packets are dropped by both roles without advancing session
/// state.
pub fn classify(payload: &[u8]) -> Option<PacketView<'_>> {
    if payload.len() < HANDSHAKE.len() || &payload[..TAG.len()] != TAG {
        return None;
    }
    match payload[3] {
        b'?' => match payload.len() {
            4 => Some(PacketView::Handshake),
            7 if &payload[4..] == b"EOF" => Some(PacketView::HandshakeEof),
            _ => None,
        },
        b':' => {
            let (seq, body_at) = parse_data_header(payload)?;
            Some(PacketView::Data {
                seq,
                body: &payload[body_at..],
            })
        },
        _ => None,
    }
}

/// Parse the `FLX:<seq>:` header of a data packet or host line.
///
/// Returns the sequence number and the offset of the first body byte.
/// `None` if the tag is wrong, the sequence field is empty, runs past
/// [`MAX_SEQ_DIGITS`] digits, or is not terminated by a colon.
pub fn parse_data_header(payload: &[u8]) -> Option<(u16, usize)> {
    // shortest data frame is "FLX:0:" plus at least one body byte
    if payload.len() < 7 || &payload[..4] != b"FLX:" {
        return None;
    }

    let mut seq: u16 = 0;
    let mut index = 4;
    while index < payload.len() && index < 4 + MAX_SEQ_DIGITS {
        match payload[index] {
            d @ b'0'..=b'9' => {
                seq = seq.checked_mul(10)?.checked_add(u16::from(d - b'0'))?;
                index += 1;
            },
            b':' => break,
            _ => return None,
        }
    }
    if index == 4 {
        // empty sequence field
        return None;
    }
    if payload.get(index) != Some(&b':') {
        return None;
    }
    Some((seq, index + 1))
}

/// Build a data packet: `FLX:<seq>:` followed by the body bytes.
pub fn data_packet(seq: u16, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + MAX_SEQ_DIGITS + 1 + body.len());
    buf.extend_from_slice(format!("FLX:{seq}:").as_bytes());
    buf.extend_from_slice(body);
    buf
}

/// Build a data acknowledgment: `FLX:<seq>:OK`.
pub fn data_ack(seq: u16) -> Vec<u8> {
    format!("FLX:{seq}:OK").into_bytes()
}

/// Build a negative handshake acknowledgment: `FLX?NOK:<reason>`.
pub fn handshake_nok(reason: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HANDSHAKE_NOK_PREFIX.len() + reason.len());
    buf.extend_from_slice(HANDSHAKE_NOK_PREFIX);
    buf.extend_from_slice(reason.as_bytes());
    buf
}

/// Parse a data acknowledgment back to its sequence number.
///
/// Accepts `FLX:<seq>:OK` and nothing else.
pub fn parse_data_ack(payload: &[u8]) -> Option<u16> {
    // "FLX:0:OK" is the shortest possible ACK
    if payload.len() < 8
        || &payload[..4] != b"FLX:"
        || payload[payload.len() - 3] != b':'
        || &payload[payload.len() - 2..] != b"OK"
    {
        return None;
    }
    let digits = &payload[4..payload.len() - 3];
    if digits.is_empty() || digits.len() > MAX_SEQ_DIGITS {
        return None;
    }
    let mut seq: u16 = 0;
    for &d in digits {
        if !d.is_ascii_digit() {
            return None;
        }
        seq = seq.checked_mul(10)?.checked_add(u16::from(d - b'0'))?;
    }
    Some(seq)
}

/// Whether a payload is a handshake acknowledgment of either polarity.
pub fn is_handshake_ack(payload: &[u8]) -> bool {
    payload.len() >= HANDSHAKE_OK.len() && payload.starts_with(HANDSHAKE)
}

/// Extract the failure reason from a handshake acknowledgment, if it is
/// negative. A positive ACK returns `None`.
pub fn handshake_nok_reason(payload: &[u8]) -> Option<String> {
    if !is_handshake_ack(payload) || payload.get(4) != Some(&b'N') {
        return None;
    }
    let reason = payload
        .strip_prefix(HANDSHAKE_NOK_PREFIX)
        .unwrap_or(&payload[4..]);
    Some(String::from_utf8_lossy(reason).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_control() {
        assert_eq!(classify(b"FLX?"), Some(PacketView::Handshake));
        assert_eq!(classify(b"FLX?EOF"), Some(PacketView::HandshakeEof));
        assert_eq!(classify(b"FLX?EOX"), None);
        assert_eq!(classify(b"FLX"), None);
        assert_eq!(classify(b"XLF?"), None);
    }

    #[test]
    fn test_classify_data() {
        let pkt = classify(b"FLX:42:\x01\x02").unwrap();
        assert_eq!(
            pkt,
            PacketView::Data {
                seq: 42,
                body: &[0x01, 0x02]
            }
        );
    }

    #[test]
    fn test_parse_data_header_limits() {
        assert_eq!(parse_data_header(b"FLX:0:x"), Some((0, 6)));
        assert_eq!(parse_data_header(b"FLX:9999:x"), Some((9999, 9)));
        // empty sequence field
        assert_eq!(parse_data_header(b"FLX::abc"), None);
        // five digits never fit the grammar
        assert_eq!(parse_data_header(b"FLX:12345:x"), None);
        // missing terminating colon
        assert_eq!(parse_data_header(b"FLX:12ab"), None);
    }

    #[test]
    fn test_data_packet_round_trip() {
        let pkt = data_packet(7, &[0xDE, 0xAD]);
        assert_eq!(&pkt[..6], b"FLX:7:");
        let (seq, at) = parse_data_header(&pkt).unwrap();
        assert_eq!(seq, 7);
        assert_eq!(&pkt[at..], &[0xDE, 0xAD]);
        assert!(pkt.len() <= MAX_PACKET);
    }

    #[test]
    fn test_parse_data_ack() {
        assert_eq!(parse_data_ack(b"FLX:0:OK"), Some(0));
        assert_eq!(parse_data_ack(b"FLX:1337:OK"), Some(1337));
        assert_eq!(parse_data_ack(&data_ack(9999)), Some(9999));
        assert_eq!(parse_data_ack(b"FLX:1:NO"), None);
        assert_eq!(parse_data_ack(b"FLX::OK"), None);
        assert_eq!(parse_data_ack(b"FLX?OK"), None);
    }

    #[test]
    fn test_handshake_ack_polarity() {
        assert!(is_handshake_ack(b"FLX?OK"));
        assert!(is_handshake_ack(b"FLX?NOK:NOFLASH"));
        assert!(!is_handshake_ack(b"FLX?"));
        assert_eq!(handshake_nok_reason(b"FLX?OK"), None);
        assert_eq!(
            handshake_nok_reason(b"FLX?NOK:NOFLASH").as_deref(),
            Some("NOFLASH")
        );
        assert_eq!(
            handshake_nok_reason(&handshake_nok("HEX>31k")).as_deref(),
            Some("HEX>31k")
        );
    }
}
