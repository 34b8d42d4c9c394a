//! Display formatting for the command line front-end

use crate::models::LiveSpeedSample;

const UNITS: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

/// Human readable byte count with binary prefixes, e.g. `1.5 MB`
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.1} {}B", value, UNITS[unit])
}

pub fn format_kbps(rate: f64) -> String {
    format!("{:.1} Kbps", rate)
}

pub fn format_sample(sample: &LiveSpeedSample) -> String {
    format!(
        "down {:>12}  up {:>12}",
        format_kbps(sample.download),
        format_kbps(sample.upload)
    )
}
