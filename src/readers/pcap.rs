//! Packet-capture reader: iterates UDP payloads out of a pcap byte stream
//! and classifies them as GPS or LiDAR traffic.

use std::io::Read;

use anyhow::{Context, Result};

const GLOBAL_HEADER_LEN: usize = 24;
const PACKET_HEADER_LEN: usize = 16;
// Magic values as read little-endian; anything else means the header fields
// are big-endian.
const MAGIC_LE_US: u32 = 0xa1b2c3d4;
const MAGIC_LE_NS: u32 = 0xa1b23c4d;
const LINKTYPE_LOOPBACK: u32 = 0;
const LINKTYPE_ETHERNET: u32 = 1;
const ETHERTYPE_IPV4: [u8; 2] = [0x08, 0x00];
const ETHERTYPE_VLAN: [u8; 2] = [0x81, 0x00];
const IP_PROTO_UDP: u8 = 17;
const UDP_HEADER_LEN: usize = 8;
const LIDAR_PAYLOAD_LENS: [usize; 2] = [1206, 1248];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Gps,
    Lidar,
}

#[derive(Debug, Default)]
pub struct PcapStats {
    pub packets: u64,
    pub gps_payloads: u64,
    pub lidar_payloads: u64,
    pub skipped_packets: u64,
    pub unrecognized_payloads: u64,
}

pub struct PacketCaptureReader {
    file_offset_us: i64,
    pub stats: PcapStats,
}

impl PacketCaptureReader {
    pub fn new(file_offset_us: i64) -> Self {
        Self {
            file_offset_us,
            stats: PcapStats::default(),
        }
    }

    /// Read the whole capture, invoking the handler with
    /// `(relative timestamp µs, classification, payload)` for each UDP
    /// payload. A handler error aborts the read (fatal for the stream).
    pub fn read(
        &mut self,
        mut stream: impl Read,
        mut handler: impl FnMut(i64, PayloadKind, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut header = [0u8; GLOBAL_HEADER_LEN];
        stream
            .read_exact(&mut header)
            .context("invalid capture file: global header shorter than 24 bytes")?;

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let little_endian = magic == MAGIC_LE_US || magic == MAGIC_LE_NS;
        let link_type = read_u32(&header[20..24], little_endian);

        let mut packet_header = [0u8; PACKET_HEADER_LEN];
        let mut first_timestamp_us: Option<i64> = None;
        loop {
            if !read_exact_or_eof(&mut stream, &mut packet_header)? {
                break;
            }
            let ts_sec = read_u32(&packet_header[0..4], little_endian);
            let ts_usec = read_u32(&packet_header[4..8], little_endian);
            let captured_len = read_u32(&packet_header[8..12], little_endian) as usize;

            let mut packet = vec![0u8; captured_len];
            if !read_exact_or_eof(&mut stream, &mut packet)? {
                break; // truncated trailing record
            }
            self.stats.packets += 1;

            let ts_us = ts_sec as i64 * 1_000_000 + ts_usec as i64;
            let first = *first_timestamp_us.get_or_insert(ts_us);
            let relative_us = ts_us - first + self.file_offset_us;

            let Some(payload) = extract_udp_payload(link_type, &packet) else {
                self.stats.skipped_packets += 1;
                continue;
            };
            match classify_payload(payload) {
                Some(PayloadKind::Gps) => {
                    self.stats.gps_payloads += 1;
                    handler(relative_us, PayloadKind::Gps, payload)?;
                }
                Some(PayloadKind::Lidar) => {
                    self.stats.lidar_payloads += 1;
                    handler(relative_us, PayloadKind::Lidar, payload)?;
                }
                None => {
                    self.stats.unrecognized_payloads += 1;
                    tracing::debug!(len = payload.len(), "unrecognized UDP payload; discarded");
                }
            }
        }
        Ok(())
    }
}

fn read_u32(bytes: &[u8], little_endian: bool) -> u32 {
    let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if little_endian {
        u32::from_le_bytes(arr)
    } else {
        u32::from_be_bytes(arr)
    }
}

/// Fill the buffer, distinguishing clean EOF (Ok(false)) from I/O errors.
fn read_exact_or_eof(stream: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

/// Strip link-layer, IPv4 and UDP headers. Returns None for anything that is
/// not IPv4/UDP on a supported link type; the packet is discarded, non-fatal.
pub fn extract_udp_payload(link_type: u32, packet: &[u8]) -> Option<&[u8]> {
    let ip = match link_type {
        LINKTYPE_ETHERNET => {
            let ethertype = packet.get(12..14)?;
            if ethertype == ETHERTYPE_IPV4 {
                packet.get(14..)?
            } else if ethertype == ETHERTYPE_VLAN {
                packet.get(18..)?
            } else {
                return None;
            }
        }
        LINKTYPE_LOOPBACK => {
            let af = u32::from_le_bytes([
                *packet.first()?,
                *packet.get(1)?,
                *packet.get(2)?,
                *packet.get(3)?,
            ]);
            if af != 2 {
                return None; // not AF_INET
            }
            packet.get(4..)?
        }
        other => {
            tracing::debug!(link_type = other, "unsupported link type; packet discarded");
            return None;
        }
    };

    if *ip.get(9)? != IP_PROTO_UDP {
        return None;
    }
    let ip_header_len = ((*ip.first()? & 0x0f) as usize) * 4;
    ip.get(ip_header_len + UDP_HEADER_LEN..)
}

/// GPS payloads carry an NMEA talker + RMC marker; LiDAR payloads have one
/// of two exact lengths.
pub fn classify_payload(payload: &[u8]) -> Option<PayloadKind> {
    if payload
        .windows(6)
        .any(|w| w[0] == b'$' && &w[3..6] == b"RMC")
    {
        return Some(PayloadKind::Gps);
    }
    if LIDAR_PAYLOAD_LENS.contains(&payload.len()) {
        return Some(PayloadKind::Lidar);
    }
    None
}
