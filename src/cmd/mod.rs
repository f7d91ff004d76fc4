//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module      | Command handled |
//! |-------------|-----------------|
//! | `run`       | `Run`           |
//! | `status`    | `Status`        |
//! | `decisions` | `Decisions`     |
//! | `clean`     | `Clean`         |

pub mod clean;
pub mod decisions;
pub mod run;
pub mod status;

pub use clean::cmd_clean;
pub use decisions::cmd_decisions;
pub use run::run_plan;
pub use status::cmd_status;
