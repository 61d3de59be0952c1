use std::time;

/// Get the current system time in epoch format.
///
/// # Returns
///
/// Current system time in seconds from epoch, or zero when the system
/// clock is set before the epoch.
#[must_use]
pub fn now_from_epoch() -> u64 {
    time::SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Formats a duration as `m:ss`, rounding up to whole seconds.
#[must_use]
pub fn format_countdown(duration: time::Duration) -> String {
    let mut seconds = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        seconds += 1;
    }
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_rounds_up() {
        assert_eq!(format_countdown(time::Duration::ZERO), "0:00");
        assert_eq!(format_countdown(time::Duration::from_millis(59_001)), "1:00");
        assert_eq!(format_countdown(time::Duration::from_secs(15 * 60)), "15:00");
    }
}
