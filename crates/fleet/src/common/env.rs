use std::time::Duration;

pub const FLEET_SPARE_COUNT: &str = "FLEET_SPARE_COUNT";
pub const FLEET_LOCK_TIMEOUT_MS: &str = "FLEET_LOCK_TIMEOUT_MS";
pub const FLEET_SLOW_PROVISIONING_MS: &str = "FLEET_SLOW_PROVISIONING_MS";

pub fn get_duration_from_env(key: &str) -> Option<Duration> {
    get_u64_from_env(key).map(Duration::from_millis)
}

pub fn get_u64_from_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
}
