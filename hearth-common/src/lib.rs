use chrono::offset::Utc as UtcOffset;
use chrono::DateTime;
use std::time::SystemTime;

pub const RFC3339_VARIANT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn now() -> String {
    let system_time = SystemTime::now();
    let dt: DateTime<UtcOffset> = system_time.into();
    format!("{}", dt.format(RFC3339_VARIANT))
}

pub fn beginning_of_time() -> String {
    let dt: DateTime<UtcOffset> = SystemTime::UNIX_EPOCH.into();
    format!("{}", dt.format(RFC3339_VARIANT))
}

pub mod env;
pub mod tid;
pub mod time;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_rfc3339_with_millis() {
        let ts = now();
        // e.g. 2024-01-01T00:00:00.000Z
        assert_eq!(ts.len(), 24);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn beginning_of_time_is_epoch() {
        assert_eq!(beginning_of_time(), "1970-01-01T00:00:00.000Z");
    }
}
