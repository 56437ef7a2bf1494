//! ROM function commands, shared by every 1-Wire device.

pub const SEARCH_NORMAL: u8 = 0xF0;
pub const SEARCH_ALARM: u8 = 0xEC;
pub const READ_ROM: u8 = 0x33;
pub const MATCH_ROM: u8 = 0x55;
pub const SKIP_ROM: u8 = 0xCC;
