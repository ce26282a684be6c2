//! Minimal radiotap header parsing.
//!
//! Only the fields needed for [`WirelessMetadata`] are decoded: channel
//! frequency and antenna signal. Everything after the dBm signal field is
//! ignored, as are vendor namespaces.

use crate::record::WirelessMetadata;

const TSFT: u32 = 1 << 0;
const FLAGS: u32 = 1 << 1;
const RATE: u32 = 1 << 2;
const CHANNEL: u32 = 1 << 3;
const FHSS: u32 = 1 << 4;
const DBM_ANTSIGNAL: u32 = 1 << 5;
const EXT: u32 = 1 << 31;

/// Parses a radiotap header, returning the metadata and the header
/// length (the offset of the 802.11 frame). `None` on any malformed or
/// truncated header.
pub fn parse(data: &[u8]) -> Option<(WirelessMetadata, usize)> {
    if data.len() < 8 || data[0] != 0 {
        return None;
    }
    let header_len = u16::from_le_bytes([data[2], data[3]]) as usize;
    if header_len < 8 || header_len > data.len() {
        return None;
    }

    let present = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    // Skip extended present words; their fields follow ours and are not
    // decoded here.
    let mut offset = 8;
    let mut ext = present;
    while ext & EXT != 0 {
        if offset + 4 > header_len {
            return None;
        }
        ext = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        offset += 4;
    }

    let mut meta = WirelessMetadata {
        signal_dbm: None,
        channel: None,
    };

    if present & TSFT != 0 {
        offset = align(offset, 8) + 8;
    }
    if present & FLAGS != 0 {
        offset += 1;
    }
    if present & RATE != 0 {
        offset += 1;
    }
    if present & CHANNEL != 0 {
        offset = align(offset, 2);
        if offset + 4 > header_len {
            return None;
        }
        let freq = u16::from_le_bytes([data[offset], data[offset + 1]]);
        meta.channel = frequency_to_channel(freq);
        offset += 4;
    }
    if present & FHSS != 0 {
        offset += 2;
    }
    if present & DBM_ANTSIGNAL != 0 {
        if offset + 1 > header_len {
            return None;
        }
        meta.signal_dbm = Some(data[offset] as i8);
    }

    Some((meta, header_len))
}

fn align(offset: usize, to: usize) -> usize {
    (offset + to - 1) & !(to - 1)
}

/// Maps a center frequency in MHz to an 802.11 channel number.
pub fn frequency_to_channel(freq: u16) -> Option<u8> {
    match freq {
        2412..=2472 => Some(((freq - 2407) / 5) as u8),
        2484 => Some(14),
        5160..=5885 => Some(((freq - 5000) / 5) as u8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_mapping() {
        assert_eq!(frequency_to_channel(2412), Some(1));
        assert_eq!(frequency_to_channel(2437), Some(6));
        assert_eq!(frequency_to_channel(2484), Some(14));
        assert_eq!(frequency_to_channel(5180), Some(36));
        assert_eq!(frequency_to_channel(1000), None);
    }

    #[test]
    fn parses_channel_and_signal() {
        // version 0, pad, len 13, present = CHANNEL | DBM_ANTSIGNAL,
        // channel 2437 MHz + flags, signal -42 dBm.
        let mut header = vec![0u8, 0, 13, 0];
        header.extend_from_slice(&(CHANNEL | DBM_ANTSIGNAL).to_le_bytes());
        header.extend_from_slice(&2437u16.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.push((-42i8) as u8);
        header.extend_from_slice(b"frame");

        let (meta, len) = parse(&header).unwrap();
        assert_eq!(len, 13);
        assert_eq!(meta.channel, Some(6));
        assert_eq!(meta.signal_dbm, Some(-42));
    }

    #[test]
    fn alignment_is_respected() {
        // FLAGS (1 byte) before CHANNEL forces a padding byte.
        let mut header = vec![0u8, 0, 15, 0];
        header.extend_from_slice(&(FLAGS | CHANNEL | DBM_ANTSIGNAL).to_le_bytes());
        header.push(0x02); // flags
        header.push(0); // channel alignment pad
        header.extend_from_slice(&2412u16.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.push((-60i8) as u8);

        let (meta, _) = parse(&header).unwrap();
        assert_eq!(meta.channel, Some(1));
        assert_eq!(meta.signal_dbm, Some(-60));
    }

    #[test]
    fn truncated_header_is_none() {
        assert!(parse(&[0, 0, 50, 0, 0, 0, 0, 0]).is_none());
        assert!(parse(&[1, 0, 8, 0, 0, 0, 0, 0]).is_none());
    }
}
