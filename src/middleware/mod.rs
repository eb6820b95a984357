pub mod auth;

pub use auth::{authenticated_user, require_staff, AuthLayer, AuthenticatedUser};
