use std::time::{SystemTime, UNIX_EPOCH};

pub fn utc_ns_now() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() * 1_000_000_000 + d.subsec_nanos() as u64,
        Err(_) => 0,
    }
}

/// Seconds as `s.mmm`, for log lines.
pub fn format_secs(secs: f64) -> String {
    format!("{:.3}", secs)
}
