pub mod clock;
pub mod config;
pub mod lifecycle;
pub mod schedule;

pub use clock::{is_close_boundary, TimeframeClock, DAILY_CLOSE_HOUR};
pub use config::ScheduleFileConfig;
pub use lifecycle::{
    CycleCheck, CycleContext, CycleOutcome, LoopSettings, SchedulerLoop, SchedulerState, SchedulerStatus,
};
pub use schedule::{AlertInstant, FixedGrid, Schedule, ScheduleMode, TimeframeAligned};
