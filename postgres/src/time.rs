use std::time::{Duration, SystemTime, SystemTimeError, UNIX_EPOCH};

/// Number of seconds between the Unix epoch and the Postgres epoch (2000-01-01 00:00:00 UTC).
const POSTGRES_EPOCH_OFFSET_SECS: u64 = 946_684_800;

/// Returns the Postgres epoch, the reference point for timestamps in standby status updates.
pub fn postgres_epoch() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(POSTGRES_EPOCH_OFFSET_SECS)
}

/// Returns the current system time as microseconds since the Postgres epoch.
///
/// Fails if the system clock is set before 2000-01-01.
pub fn micros_since_postgres_epoch() -> Result<i64, SystemTimeError> {
    let elapsed = postgres_epoch().elapsed()?;

    Ok(elapsed.as_micros() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_epoch_is_first_of_january_2000() {
        let secs = postgres_epoch()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(secs, 946_684_800);
    }

    #[test]
    fn micros_since_epoch_is_positive() {
        assert!(micros_since_postgres_epoch().unwrap() > 0);
    }
}
