pub mod logging;
#[allow(dead_code)]
pub mod mocks;

pub use logging::init_test_logging;
