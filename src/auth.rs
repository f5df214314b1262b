//! Session-cookie authorization gate.

use crate::http::{Request, Response};
use crate::session::SessionManager;

/// Name of the single well-known session cookie.
pub const SESSION_COOKIE: &str = "sessionId";

/// Pulls the session token out of a `Cookie` header value.
pub fn session_id_from_cookie(cookie: &str) -> Option<String> {
    let needle = "sessionId=";
    let pos = cookie.find(needle)?;
    let rest = &cookie[pos + needle.len()..];
    let sid = match rest.find(';') {
        Some(semi) => &rest[..semi],
        None => rest,
    };
    let sid = sid.trim();
    if sid.is_empty() {
        None
    } else {
        Some(sid.to_string())
    }
}

/// Maps an inbound request's credential material to allow/deny.
///
/// Every protected route needs exactly the same behavior on failure, so the
/// gate builds the redirect itself: `Err` carries the response to send and
/// the caller must stop processing. `Ok(())` has no side effect.
pub struct AuthGate {
    login_path: &'static str,
}

impl Default for AuthGate {
    fn default() -> Self {
        Self { login_path: "/login" }
    }
}

impl AuthGate {
    pub fn require_auth(
        &self,
        req: &Request,
        sessions: &mut SessionManager,
    ) -> Result<(), Response> {
        let sid = req.header("Cookie").and_then(session_id_from_cookie);
        match sid {
            Some(sid) if sessions.is_session_valid(&sid) => Ok(()),
            _ => {
                log::info!("Session invalid or missing, redirecting to login");
                Err(Response::redirect(self.login_path))
            }
        }
    }

    /// `Set-Cookie` value installing a fresh session.
    pub fn login_cookie(token: &str) -> String {
        format!("{SESSION_COOKIE}={token}; Path=/")
    }

    /// `Set-Cookie` value clearing the session on logout.
    pub fn logout_cookie() -> String {
        format!("{SESSION_COOKIE}=deleted; Path=/; Max-Age=0")
    }
}
