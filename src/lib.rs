pub mod config;
pub mod error;
pub mod identity;
pub mod movies;
pub mod security;
pub mod server;

pub use config::{ProviderKind, ServerConfig};
pub use error::{AppError, AppResult};
pub use identity::{Locals, RequestContext, ResolveError, Resolution, SessionResolver};

// Debug-build printing helper for identity traces: expands to eprintln! in tests and
// debug builds and compiles away otherwise.
// Usage: tprintln!("session.issue user={}", user);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
