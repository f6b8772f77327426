pub mod api;
pub mod error;
pub mod services;
pub mod utils;

pub use error::{AppResult, Error};
pub use services::session_services::{ContentKind, SessionManager};
pub use services::upstream_services::{DynUpstreamService, UpstreamService};

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
