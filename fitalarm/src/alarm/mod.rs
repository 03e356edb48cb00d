mod config;
mod detector;
mod machine;
mod state;

pub use config::{AlarmConfig, format_time_of_day, parse_time_of_day};
pub use detector::ThresholdDetector;
pub use machine::{AlarmSnapshot, AlarmStateMachine, Outcome, Transition};
pub use state::{AlarmEvent, AlarmState, StopReason, TransitionOrigin, TriggerCause};
