pub mod artifacts;
pub mod config;
pub mod conversation;
pub mod environment;
pub mod errors;
pub mod input;
pub mod lock;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod server;
pub mod session;
pub mod stage;
