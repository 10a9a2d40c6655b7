pub mod conductor_config;
pub mod config;
pub mod errors;
pub mod init;
pub mod logging;
pub mod loop_detect;
pub mod orchestrator;
pub mod phase;
pub mod scheduler;
pub mod state;
pub mod waves;
pub mod workers;
