pub mod playlist_services;
pub mod session_services;
pub mod upstream_services;

pub use session_services::SessionManager;
pub use upstream_services::DynUpstreamService;
