//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module     | Command handled                                    |
//! |------------|----------------------------------------------------|
//! | `run`      | `Run` — execute a plan to completion               |
//! | `check`    | `Check` — validate a plan and preview allocation   |
//! | `profiles` | `Profiles` — print effective profile tables        |

pub mod check;
pub mod profiles;
pub mod run;

pub use check::cmd_check;
pub use profiles::cmd_profiles;
pub use run::run_plan;
