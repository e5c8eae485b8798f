//! Shared helpers: logging, shutdown signals, timeouts, error containment

pub mod env;
pub mod error;
pub mod logging;
pub mod signal;
pub mod timeout;

pub use env::{env_bool, env_opt, env_parse};
pub use error::panic_message;
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
pub use signal::wait_for_shutdown_signal;
pub use timeout::{with_custom_timeout, DEFAULT_MODULE_STOP_TIMEOUT};
