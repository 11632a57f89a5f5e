pub mod app_state;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod lifecycle;
pub mod middleware_auth;
pub mod models;
pub mod notifications;
pub mod policy;
pub mod ranking;
pub mod routes;
pub mod store;
pub mod utils;

pub use app_state::AppState;
pub use config::Config;
pub use errors::*;
pub use lifecycle::{Actor, BorrowCommand, BorrowOutcome, LifecycleEngine, ReturnReceipt};
pub use models::*;
pub use routes::router;
pub use utils::*;
