pub mod audit;
pub mod bitflip;
pub mod cache;
pub mod command;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod extent;
pub mod record;
pub mod select;
pub mod store;
pub mod watch;
