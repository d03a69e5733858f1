/// Router Module Index
///
/// Splits the routing table by access level. Each module's router is wrapped with the
/// matching guard in `create_router`, so a route's protection follows from where it is
/// declared rather than from each handler remembering to check.

/// Routes open to anonymous callers (CSRF bootstrap, login, public listings).
pub mod public;

/// Routes behind the session guard.
pub mod authenticated;

/// Routes behind the admin guard, nested under `/admin`.
pub mod admin;
