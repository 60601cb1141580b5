pub mod activity;
pub mod booking;
pub mod conflict;
pub mod recurrence;
