pub mod clickhelp;
pub mod cli;
pub mod load_config;
pub mod s3;
pub mod tribble;

pub use cli::{render_report, run, Cli, WorkflowArg};
