//! Inspect command: probe an input file and report its kind and contents.

use std::io::Read;

use anyhow::{Context, Result};

use crate::event::format_mmss;
use crate::readers::pcap::PacketCaptureReader;
use crate::readers::riff;

/// Probe a file by magic and print a summary of what it contains.
pub fn inspect_file(path: &str) -> Result<()> {
    let mut file = std::fs::File::open(path).with_context(|| format!("failed to open {path}"))?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)
        .context("file shorter than 4 bytes")?;

    let reopen = std::io::BufReader::new(
        std::fs::File::open(path).with_context(|| format!("failed to open {path}"))?,
    );
    match &magic {
        b"RIFF" => inspect_container(path, reopen),
        _ if is_pcap_magic(&magic) => inspect_capture(path, reopen),
        _ => {
            println!("{path}: unrecognized format (magic {:02x?})", magic);
            Ok(())
        }
    }
}

fn is_pcap_magic(magic: &[u8; 4]) -> bool {
    let le = u32::from_le_bytes(*magic);
    let be = u32::from_be_bytes(*magic);
    [0xa1b2c3d4, 0xa1b23c4d].contains(&le) || [0xa1b2c3d4, 0xa1b23c4d].contains(&be)
}

fn inspect_capture(path: &str, stream: impl Read) -> Result<()> {
    let mut reader = PacketCaptureReader::new(0);
    let mut last_us: i64 = 0;
    reader.read(stream, |timestamp_us, _, _| {
        last_us = last_us.max(timestamp_us);
        Ok(())
    })?;

    println!("{path}: packet capture");
    println!("  packets:        {}", reader.stats.packets);
    println!("  gps payloads:   {}", reader.stats.gps_payloads);
    println!("  lidar payloads: {}", reader.stats.lidar_payloads);
    println!("  skipped:        {}", reader.stats.skipped_packets);
    println!("  unrecognized:   {}", reader.stats.unrecognized_payloads);
    println!("  span:           {}", format_mmss(last_us as f64 * 1e-6));
    Ok(())
}

fn inspect_container(path: &str, stream: impl Read) -> Result<()> {
    let summary = riff::scan(stream)?;

    println!("{path}: signal container");
    println!("  timestamp offset: {} us", summary.timestamp_offset_us);
    println!("  chunks:           {}", summary.chunks);
    println!("  signal chunks:    {}", summary.signal_chunks);
    if let (Some(first), Some(last)) = (summary.first_delta_us, summary.last_delta_us) {
        let span_s = last.saturating_sub(first) as f64 * 1e-6;
        println!("  span:             {}", format_mmss(span_s));
    }
    println!("  messages:");
    for (message_id, count) in &summary.message_counts {
        println!("    0x{message_id:08x}: {count}");
    }
    Ok(())
}
