//! Cooperative cancellation for in-flight node tasks.

mod token;

pub use token::CancellationToken;
