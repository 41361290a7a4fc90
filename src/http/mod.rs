//! HTTP surface: admission middleware and the standalone admission service.

mod handlers;
mod middleware;

pub use handlers::{router, AppState};
pub use middleware::admission;
