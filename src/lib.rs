pub mod allocation;
pub mod boundary;
pub mod conductor_config;
pub mod config;
pub mod context;
pub mod errors;
pub mod execution;
pub mod journal;
pub mod logging;
pub mod loops;
pub mod plan;
pub mod session;
pub mod ui;
pub mod util;
pub mod validation;
pub mod workers;
