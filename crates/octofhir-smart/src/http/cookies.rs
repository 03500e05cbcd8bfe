//! Flow and session cookies.

use cookie::{Cookie, SameSite};
use time::Duration;
use uuid::Uuid;

/// Cookie carrying the id of the in-flight authorization attempt.
pub const FLOW_COOKIE_NAME: &str = "smart_flow";

/// Cookie carrying the session id after a completed flow.
pub const SESSION_COOKIE_NAME: &str = "smart_session";

/// Create the flow correlation cookie.
pub fn flow_cookie(flow_id: Uuid, path: &str, max_age: Duration) -> Cookie<'static> {
    Cookie::build((FLOW_COOKIE_NAME, flow_id.to_string()))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .path(path.to_string())
        .max_age(max_age)
        .build()
}

/// Create the session cookie.
pub fn session_cookie(session_id: &str, path: &str, max_age: Duration) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, session_id.to_string()))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .path(path.to_string())
        .max_age(max_age)
        .build()
}

/// Removal cookie for `name`, scoped like the original.
pub fn removal_cookie(name: &'static str, path: &str) -> Cookie<'static> {
    Cookie::build(name).path(path.to_string()).build()
}
