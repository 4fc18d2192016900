use thiserror::Error;

/// Errors produced while decoding `HH:MM:SS` timestamps
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("invalid timestamp format: {0:?}")]
    Format(String),

    #[error("invalid timestamp component {component:?} in {timestamp:?}")]
    Component { timestamp: String, component: String },
}

/// Convert an `HH:MM:SS` timestamp to milliseconds
pub fn ts_to_ms(timestamp: &str) -> Result<u64, TimestampError> {
    let parts: Vec<&str> = timestamp.trim().split(':').collect();
    if parts.len() != 3 {
        return Err(TimestampError::Format(timestamp.to_string()));
    }

    let mut values = [0u64; 3];
    for (value, part) in values.iter_mut().zip(&parts) {
        *value = part.parse().map_err(|_| TimestampError::Component {
            timestamp: timestamp.to_string(),
            component: part.to_string(),
        })?;
    }

    let [hours, minutes, seconds] = values;
    Ok((hours * 3600 + minutes * 60 + seconds) * 1000)
}

/// Like [`ts_to_ms`], but maps malformed input to 0
pub fn ts_to_ms_or_zero(timestamp: &str) -> u64 {
    ts_to_ms(timestamp).unwrap_or(0)
}

/// Format milliseconds as `HH:MM:SS` (sub-second precision is dropped)
pub fn ms_to_ts(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Zero-padded, sub-24h timestamp.
///
/// Only timestamps of this shape sort lexicographically in chronological
/// order, which the forward block selector relies on.
pub fn is_well_formed(timestamp: &str) -> bool {
    let bytes = timestamp.as_bytes();
    if bytes.len() != 8 || bytes[2] != b':' || bytes[5] != b':' {
        return false;
    }

    let field = |range: std::ops::Range<usize>| -> Option<u32> {
        let part = &timestamp[range];
        if part.bytes().all(|b| b.is_ascii_digit()) {
            part.parse().ok()
        } else {
            None
        }
    };

    matches!(
        (field(0..2), field(3..5), field(6..8)),
        (Some(h), Some(m), Some(s)) if h < 24 && m < 60 && s < 60
    )
}
