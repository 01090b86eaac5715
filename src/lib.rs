pub mod cli;
pub mod config;
pub mod database;
pub mod hierarchy;
pub mod scheduler;
pub mod services;

#[cfg(test)]
pub mod testing;
