//! Adapter feeding `EspHttpServer` requests through the portal router.

use std::io::Read;
use std::sync::Arc;

use esp_idf_svc::{
    http::{
        server::{Configuration, EspHttpConnection, EspHttpServer, Request as EspRequest},
        Headers, Method as EspMethod, Query,
    },
    io::Write,
};

use crate::auth::AuthGate;
use crate::http::{Method, Request, Response, Router};
use crate::portal::PendingAction;
use crate::routes::{SharedContext, UPDATE_CHUNK};

/// Upper bound on a buffered request body. Only form posts travel this
/// path; the firmware upload streams and never buffers whole.
const MAX_BODY: usize = 8 * 1024;

/// Starts the HTTP server and registers every router path plus the
/// captive wildcard. The returned server owns its registrations; keep it
/// alive for the lifetime of the portal.
pub fn serve(router: Arc<Router>, ctx: SharedContext) -> anyhow::Result<EspHttpServer<'static>> {
    let config = Configuration {
        stack_size: 10240,
        max_uri_handlers: 32,
        uri_match_wildcard: true,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&config)?;

    for (method, path) in router.paths() {
        // The firmware upload gets a dedicated streaming handler; a
        // multi-hundred-KB image must not be buffered on this heap.
        if method == Method::Post && path == "/update" {
            continue;
        }
        register(&mut server, router.clone(), method, &path)?;
    }
    register_update(&mut server, ctx)?;
    // Everything else, connectivity probes included, falls through to the
    // router's captive redirect.
    register(&mut server, router.clone(), Method::Get, "/*")?;
    register(&mut server, router, Method::Post, "/*")?;

    log::info!("HTTP server started");
    Ok(server)
}

fn register(
    server: &mut EspHttpServer<'static>,
    router: Arc<Router>,
    method: Method,
    path: &str,
) -> anyhow::Result<()> {
    let esp_method = match method {
        Method::Get => EspMethod::Get,
        Method::Post => EspMethod::Post,
    };
    server.fn_handler::<anyhow::Error, _>(path, esp_method, move |mut req| {
        let uri = req.uri().to_string();
        let cookie = req.header("Cookie").map(str::to_string);
        let content_type = req.header("Content-Type").map(str::to_string);

        let mut body = Vec::new();
        if method == Method::Post {
            let mut buf = [0u8; 1024];
            loop {
                let n = req.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&buf[..n]);
                if body.len() > MAX_BODY {
                    anyhow::bail!("request body too large");
                }
            }
        }

        let (path, query) = match uri.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (uri.as_str(), None),
        };
        let mut request = Request::new(method, path);
        if let Some(q) = query {
            request = request.with_urlencoded(q);
        }
        if let Some(cookie) = &cookie {
            request = request.with_header("Cookie", cookie);
        }
        let is_form = content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if is_form {
            request = request.with_urlencoded(std::str::from_utf8(&body)?);
        } else {
            request = request.with_body(body);
        }

        let resp = router.dispatch(&request);
        write_out(req, &resp)
    })?;
    Ok(())
}

/// Streams the uploaded image through the updater chunk by chunk. The
/// context stays locked for the duration of the upload; this is a
/// single-admin device and the service loop just waits its turn.
fn register_update(server: &mut EspHttpServer<'static>, ctx: SharedContext) -> anyhow::Result<()> {
    server.fn_handler::<anyhow::Error, _>("/update", EspMethod::Post, move |mut req| {
        let probe = match req.header("Cookie") {
            Some(cookie) => Request::post("/update").with_header("Cookie", cookie),
            None => Request::post("/update"),
        };

        let mut guard = ctx.lock().unwrap();
        if let Err(denied) = AuthGate::default().require_auth(&probe, &mut guard.sessions) {
            drop(guard);
            return write_out(req, &denied);
        }
        let Some(updater) = guard.updater.as_mut() else {
            drop(guard);
            return write_out(req, &Response::text(500, "Firmware updates not supported"));
        };

        log::info!("[OTA] Update start");
        let streamed = (|| -> anyhow::Result<usize> {
            updater.begin()?;
            let mut total = 0usize;
            let mut buf = [0u8; UPDATE_CHUNK];
            loop {
                let n = req.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                updater.write(&buf[..n])?;
                total += n;
            }
            updater.finish()?;
            Ok(total)
        })();

        match streamed {
            Ok(total) => {
                log::info!("[OTA] Update success, {total} bytes streamed");
                guard.pending = Some(PendingAction::Reboot);
                drop(guard);
                write_out(req, &Response::text(200, "Update successful. Rebooting..."))
            }
            Err(e) => {
                drop(guard);
                log::error!("[OTA] Update failed: {e}");
                write_out(req, &Response::text(500, "Update failed!"))
            }
        }
    })?;
    Ok(())
}

fn write_out(req: EspRequest<&mut EspHttpConnection<'_>>, resp: &Response) -> anyhow::Result<()> {
    let mut headers: Vec<(&str, &str)> = vec![("Content-Type", resp.content_type)];
    for (name, value) in &resp.headers {
        headers.push((name.as_str(), value.as_str()));
    }
    let mut out = req.into_response(resp.status, None, &headers)?;
    out.write_all(resp.body.as_bytes())?;
    Ok(())
}
