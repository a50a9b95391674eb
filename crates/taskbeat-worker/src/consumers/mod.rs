//! Event consumers

pub mod recurring;
pub mod reminder;

pub use recurring::RecurringTaskConsumer;
pub use reminder::{DeliveryOutcome, ReminderConsumer, ReminderJobData};
