// Library exports for the tether process supervisor

pub mod cli;
pub mod config;
pub mod error;
pub mod logs;
pub mod process;
