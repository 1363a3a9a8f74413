//! Checksum utilities

/// Checksum calculations for the headers the engine writes
pub struct PacketParser;

impl PacketParser {
    /// Calculate Internet Checksum (RFC 1071)
    pub fn internet_checksum(data: &[u8]) -> u16 {
        fold(sum_words(data, 0))
    }

    /// Calculate UDP checksum with the IPv4 pseudo-header
    ///
    /// A computed value of zero is transmitted as `0xFFFF` (RFC 768).
    #[allow(clippy::cast_possible_truncation)]
    pub fn udp_checksum_ipv4(src_ip: &[u8; 4], dst_ip: &[u8; 4], udp_segment: &[u8]) -> u16 {
        let mut sum = sum_words(src_ip, 0);
        sum = sum_words(dst_ip, sum);
        sum += 17; // zero byte + protocol
        sum += (udp_segment.len() as u32) & 0xFFFF;
        sum = sum_words(udp_segment, sum);

        match fold(sum) {
            0 => 0xFFFF,
            checksum => checksum,
        }
    }

    /// Calculate IPv4 header checksum, ignoring the stored checksum field
    pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
        if header.len() < 12 {
            return Self::internet_checksum(header);
        }
        let sum = sum_words(&header[..10], 0);
        fold(sum_words(&header[12..], sum))
    }

    /// Check a received IPv4 header against its checksum field
    pub fn verify_ipv4_header(header: &[u8]) -> bool {
        Self::internet_checksum(header) == 0
    }
}

fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }

    // Odd byte is padded with zero
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    sum
}

#[allow(clippy::cast_possible_truncation)]
fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
