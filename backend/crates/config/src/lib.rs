pub mod env;
pub mod tracing_init;

pub use env::{get_optional, get_var, parse_var_or, AppConfig, CheckpointGranularity};
pub use tracing_init::init_tracing;
