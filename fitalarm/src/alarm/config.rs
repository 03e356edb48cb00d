use time::Time;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

const TIME_OF_DAY: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmConfig {
    /// Smoothed heart rate (beats per minute) that trips or silences the
    /// alarm. Always supplied by the user; there is no default.
    pub bpm_threshold: u32,

    /// Time of day for the scheduled trigger, compared at minute
    /// granularity. `None` leaves only the sensor trigger.
    pub scheduled_time: Option<Time>,
}

impl AlarmConfig {
    pub fn new(bpm_threshold: u32) -> Self {
        Self {
            bpm_threshold,
            scheduled_time: None,
        }
    }

    pub fn with_scheduled_time(mut self, time: Time) -> Self {
        self.scheduled_time = Some(time);
        self
    }
}

/// Parse `HH:MM` (24 hour, zero padded).
pub fn parse_time_of_day(s: &str) -> Result<Time, time::error::Parse> {
    Time::parse(s.trim(), TIME_OF_DAY)
}

pub fn format_time_of_day(time: Time) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}
