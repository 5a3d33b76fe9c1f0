//! Router Module Index
//!
//! Routes are split by access level. Access control is applied to a whole module
//! through an Axum layer in `create_router`, never per handler.

/// Routes open to anonymous clients: account creation, login and the read paths
/// over the catalog.
pub mod public;

/// Routes behind `auth_middleware`. Every handler here receives a resolved `AuthUser`.
pub mod authenticated;
