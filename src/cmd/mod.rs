//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                 |
//! |-------------|----------------------------------|
//! | `project`   | `Init`                           |
//! | `run`       | `Run`                            |
//! | `status`    | `Status`, `Health`, `Reset`      |
//! | `config`    | `Config`                         |
//! | `objective` | `Objective`, `Task`              |
//! | `signal`    | `Signal`                         |

pub mod config;
pub mod objective;
pub mod project;
pub mod run;
pub mod signal;
pub mod status;

pub use config::cmd_config;
pub use objective::{cmd_objective, cmd_task};
pub use project::cmd_init;
pub use run::cmd_run;
pub use signal::cmd_signal;
pub use status::{cmd_health, cmd_reset, cmd_status};
