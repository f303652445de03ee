//! Compact human-readable formatting for byte counts and speeds.

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Format a byte count, e.g. `"1.5 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < MIB {
        format!("{:.1} KB", b / KIB)
    } else if b < GIB {
        format!("{:.2} MB", b / MIB)
    } else {
        format!("{:.2} GB", b / GIB)
    }
}

/// Format a per-interval byte delta as a speed, e.g. `"2.50 MB/s"`.
pub fn format_speed(bytes_per_interval: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_interval))
}
