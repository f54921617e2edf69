//!
//! Logging helpers usable before and alongside the tracing subscriber
//!
use tracing::Metadata;
use tracing_subscriber::layer::{Context, Filter};

///
/// Target of events every log output shows, whatever its directive
///
pub const ALWAYS_TARGET: &str = "statbridge::always";

///
/// [`Filter`] passing only events logged with [`always!`]
///
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl<S> Filter<S> for Always {
    fn enabled(&self, meta: &Metadata<'_>, _: &Context<'_, S>) -> bool {
        meta.target() == ALWAYS_TARGET
    }
}

///
/// Log at INFO to every output, even with `--quiet` or a restrictive directive
///
#[macro_export]
macro_rules! always {
    ($($input:tt)*) => {
        ::tracing::event!(target: $crate::log::ALWAYS_TARGET, ::tracing::Level::INFO, $($input)*)
    };
}
pub use always;

///
/// Write to stderr in the same shape as the stderr log layer. Only for messages emitted before the
/// subscriber is installed or about the subscriber itself.
///
#[macro_export]
macro_rules! log_early {
    ($level:expr, $($input:tt)*) => {{
        ::std::eprintln!("{:>5} {}", $level, ::std::format_args!($($input)*));
    }};
}
pub use log_early;

#[macro_export]
macro_rules! info_early {
    ($($input:tt)*) => {
        $crate::log::log_early!(::tracing::Level::INFO, $($input)*)
    };
}
pub use info_early;

#[macro_export]
macro_rules! warn_early {
    ($($input:tt)*) => {
        $crate::log::log_early!(::tracing::Level::WARN, $($input)*)
    };
}
pub use warn_early;

#[macro_export]
macro_rules! error_early {
    ($($input:tt)*) => {
        $crate::log::log_early!(::tracing::Level::ERROR, $($input)*)
    };
}
pub use error_early;
