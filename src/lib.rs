pub mod config;
pub mod convert;
pub mod engine;
pub mod input;
pub mod outline;
pub mod page;
pub mod pipeline;
pub mod scheduler;
pub mod scroll;
pub mod stage;
pub mod surface;
pub mod theme;
pub mod tree;
pub mod watch;
