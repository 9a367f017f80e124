// ============================================================================
// I/O Subsystem Module
// ============================================================================
pub mod log;

pub use self::log::{LogSink, init as init_logging};
