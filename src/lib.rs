pub mod config;
pub mod decisions;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod plan;
pub mod policy;
pub mod session;
pub mod signals;
pub mod state;
pub mod stream;
pub mod tracker;
pub mod ui;
pub mod util;
