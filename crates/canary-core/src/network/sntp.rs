//! SNTP (RFC 4330) packet handling.
//!
//! Only what a client needs to ask for the time once: build a request and
//! pull the transmit timestamp out of the server's reply.

pub const NTP_PORT: u16 = 123;
pub const PACKET_LEN: usize = 48;

/// Seconds between 1900-01-01 (NTP era 0) and 1970-01-01.
pub const NTP_UNIX_OFFSET: u32 = 2_208_988_800;

const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const VERSION: u8 = 4;
const TRANSMIT_TIMESTAMP: usize = 40;

/// Client request: LI 0, version 4, mode 3, everything else zero.
pub fn request() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = (VERSION << 3) | MODE_CLIENT;
    packet
}

/// Unix epoch seconds from a server reply. `None` for short packets, replies
/// that are not from a server, kiss-of-death (stratum 0) and timestamps
/// before 1970.
pub fn parse_reply(packet: &[u8]) -> Option<u32> {
    if packet.len() < PACKET_LEN {
        return None;
    }

    let mode = packet[0] & 0x07;
    let stratum = packet[1];
    if mode != MODE_SERVER || stratum == 0 {
        return None;
    }

    let bytes: [u8; 4] = packet[TRANSMIT_TIMESTAMP..TRANSMIT_TIMESTAMP + 4].try_into().ok()?;
    u32::from_be_bytes(bytes).checked_sub(NTP_UNIX_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(stratum: u8, ntp_secs: u32) -> [u8; PACKET_LEN] {
        let mut packet = [0u8; PACKET_LEN];
        packet[0] = (VERSION << 3) | MODE_SERVER;
        packet[1] = stratum;
        packet[TRANSMIT_TIMESTAMP..TRANSMIT_TIMESTAMP + 4].copy_from_slice(&ntp_secs.to_be_bytes());
        packet
    }

    #[test]
    fn test_request_header() {
        let packet = request();
        assert_eq!(packet[0], 0x23);
        assert!(packet[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parse_reply() {
        let packet = reply(2, NTP_UNIX_OFFSET + 1_700_000_000);
        assert_eq!(parse_reply(&packet), Some(1_700_000_000));
    }

    #[test]
    fn test_rejects_bad_replies() {
        assert_eq!(parse_reply(&reply(2, 5)), None, "before 1970");
        assert_eq!(parse_reply(&reply(0, NTP_UNIX_OFFSET + 10)), None, "kiss-of-death");
        assert_eq!(parse_reply(&request()), None, "client packet");
        assert_eq!(parse_reply(&[0x24; 20]), None, "truncated");
    }
}
