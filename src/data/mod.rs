//! Data module: column dependency sets and communication schedules

pub mod columns;
pub mod schedule;

pub use columns::OffProcColumns;
pub use schedule::{CommData, Message, ParSchedule};
