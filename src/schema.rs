//! Schema command - Print supported parser → Rerun mappings

use anyhow::Result;

/// Print all supported input parsers and the Rerun archetypes they feed.
pub fn print_schema() -> Result<()> {
    println!("Supported parser → Rerun mappings:");
    println!("---------------------------------------------------------------");

    let mappings = vec![
        ("PcapGpsParser", "GeoPoints + GeoLineStrings", "NMEA RMC fixes with trajectory"),
        ("PcapLidarParser", "Points3D", "rotation frames, intensity colormap"),
        ("VideoParser", "EncodedImage", "subsampled, scaled JPEG frames"),
        ("RiffParser", "Scalars + TextDocument", "selected CAN signals with dashboard"),
    ];

    for (parser, rerun_archetype, notes) in mappings {
        println!("{:<18} → {:<28} {}", parser, rerun_archetype, notes);
    }

    Ok(())
}
