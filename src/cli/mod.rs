//! Command handlers and terminal presentation.

pub mod fetch;
pub mod setup;
pub mod ui;
