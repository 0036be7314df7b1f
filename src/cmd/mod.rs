//! CLI command implementations.
//!
//! | Module      | Commands handled    |
//! |-------------|---------------------|
//! | `run`       | `Run`               |
//! | `serve`     | `Serve`             |
//! | `workspace` | `Status`, `Clean`   |

pub mod run;
pub mod serve;
pub mod workspace;

pub use run::{RunArgs, cmd_run};
pub use serve::cmd_serve;
pub use workspace::{cmd_clean, cmd_status};
