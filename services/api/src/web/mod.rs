pub mod auth;
pub mod middleware;
pub mod rest;
pub mod state;

// Re-export the pieces the binary needs to assemble the router.
pub use middleware::{require_auth, AuthUser};
pub use rest::ApiDoc;
