pub mod api;
pub mod config;
pub mod evaluator;
pub mod handler;
pub mod metrics_consts;
pub mod metrics_utils;
pub mod overrides;
pub mod router;
pub mod server;
pub mod sync;

// Shared by unit tests and the integration tests under tests/, so it has to
// be compiled into the library.
pub mod test_utils;
