pub mod time_utils;

pub use time_utils::{parse_iso, parse_time_of_day, DisplayZone};
