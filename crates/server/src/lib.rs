pub mod api;
pub mod metrics;
pub mod services;
pub mod state;

pub use api::create_router;
pub use services::Services;
pub use state::AppState;
