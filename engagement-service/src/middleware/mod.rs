mod admin;

pub use admin::{admin_session_middleware, ADMIN_SESSION_COOKIE};
