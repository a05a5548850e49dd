//! Logging facilities for BookHub core.
//!
//! BookHub crates use the `tracing` crate for instrumentation and never
//! install a subscriber themselves. To see logs, install one in your
//! application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("bookhub_chat=debug,bookhub_core=warn")
//!         .init();
//! }
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "bookhub_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "bookhub_core::signal";
    /// Keyed subscription target.
    pub const KEYED: &str = "bookhub_core::keyed";
}
