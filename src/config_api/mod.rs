pub mod auth;
pub mod server;

pub use auth::{AuthStore, McpAuthState, UiAuthState};
pub use server::{serve, router};
