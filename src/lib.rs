pub mod config;
pub mod daemon;
pub mod detach;
pub mod logger;
