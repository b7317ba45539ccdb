pub mod adb;
pub mod bundle;
pub mod commands;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod packages;
pub mod scheduler;
pub mod shortcuts;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;
