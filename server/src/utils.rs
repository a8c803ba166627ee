use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Fixed color per participant slot
pub fn player_color(slot: u8) -> String {
    let colors = ["green", "blue", "yellow", "magenta"];
    colors[(slot.max(1) as usize - 1) % colors.len()].to_string()
}

// Fallback display name for a join without a username
pub fn default_username(slot: u8) -> String {
    format!("Player{}", slot)
}
