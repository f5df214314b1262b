//! Minimal HTTP request/response model and route table.
//!
//! The wire protocol itself is an external collaborator; the platform
//! server adapter builds a [`Request`] per connection, pushes it through
//! the [`Router`] and writes the returned [`Response`] back out.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// An inbound request, already read off the wire.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    headers: Vec<(String, String)>,
    form: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: Vec::new(),
            form: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_form(mut self, name: &str, value: &str) -> Self {
        self.form.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Parses an `application/x-www-form-urlencoded` body or query string
    /// into the form table.
    pub fn with_urlencoded(mut self, raw: &str) -> Self {
        for pair in raw.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (k, v) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            self.form.insert(url_decode(k), url_decode(v));
        }
        self
    }

    /// Header lookup, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }
}

/// An outbound response value; the platform adapter serializes it.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Response {
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn css(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/css",
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self::text(302, "Redirecting...").with_header("Location", location)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub type Handler = Box<dyn Fn(&Request) -> Response + Send>;
/// Authorization hook applied to protected routes before their handler
/// runs; `Err` carries the already-built denial response.
pub type AuthCheck = Box<dyn Fn(&Request) -> Result<(), Response> + Send>;

struct Route {
    method: Method,
    path: String,
    protected: bool,
    handler: Handler,
}

/// Exact-match route table with captive-portal fallback: any unmatched
/// path, including the OS connectivity probes, redirects to the AP's own
/// address.
pub struct Router {
    routes: Vec<Route>,
    auth: AuthCheck,
    captive_target: String,
}

impl Router {
    pub fn new(ap_ip: std::net::Ipv4Addr, auth: AuthCheck) -> Self {
        Self {
            routes: Vec::new(),
            auth,
            captive_target: format!("http://{ap_ip}/"),
        }
    }

    pub fn register(&mut self, method: Method, path: &str, protected: bool, handler: Handler) {
        self.routes.push(Route {
            method,
            path: path.to_string(),
            protected,
            handler,
        });
    }

    /// Paths registered on the platform HTTP server (the fallback catches
    /// everything else there via a wildcard handler).
    pub fn paths(&self) -> Vec<(Method, String)> {
        self.routes
            .iter()
            .map(|r| (r.method, r.path.clone()))
            .collect()
    }

    pub fn dispatch(&self, req: &Request) -> Response {
        for route in &self.routes {
            if route.method == req.method && route.path == req.path {
                if route.protected {
                    if let Err(denied) = (self.auth)(req) {
                        return denied;
                    }
                }
                return (route.handler)(req);
            }
        }
        log::debug!("Captive redirect for {}", req.path);
        Response::redirect(&self.captive_target)
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
