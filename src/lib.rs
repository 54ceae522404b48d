pub mod cli;
pub mod config;
pub mod queue;
pub mod remote;
pub mod retrieve;
pub mod sync;
