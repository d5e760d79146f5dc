pub mod cli;
pub mod command;
pub mod core;
pub mod error;
pub mod pidfile;
pub mod shutdown;
pub mod signal;
pub mod supervisor;
pub mod time;
pub mod trigger;

pub use self::core::Core;
