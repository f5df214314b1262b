//! HTTP route handlers and the shared portal context they operate on.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use crate::auth::AuthGate;
use crate::config::ConfigStore;
use crate::http::{Method, Request, Response, Router};
use crate::pages;
use crate::portal::{FirmwareUpdater, PendingAction};
use crate::scan::WifiScan;
use crate::session::SessionManager;

/// Minimum accepted administrator password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Chunk size for feeding a firmware image into the updater. Bounds the
/// working buffer so an image never has to sit in memory whole.
pub const UPDATE_CHUNK: usize = 4096;

/// Mutable state shared between the lifecycle and the route handlers.
///
/// The service model is a single cooperative loop, but the platform HTTP
/// server invokes handlers from its own task, so the context sits behind a
/// mutex.
pub struct PortalContext {
    pub config: ConfigStore,
    pub sessions: SessionManager,
    pub scan: WifiScan,
    pub updater: Option<Box<dyn FirmwareUpdater>>,
    /// Action queued by a handler for the next lifecycle tick. Restarts
    /// must not fire from inside an HTTP callback.
    pub pending: Option<PendingAction>,
}

pub type SharedContext = Arc<Mutex<PortalContext>>;

/// Builds the full route table. Every non-public route is wrapped by the
/// auth gate.
pub fn build_router(ctx: SharedContext, ap_ip: Ipv4Addr) -> Router {
    let gate = AuthGate::default();
    let auth_ctx = ctx.clone();
    let mut router = Router::new(
        ap_ip,
        Box::new(move |req| {
            let mut ctx = auth_ctx.lock().unwrap();
            gate.require_auth(req, &mut ctx.sessions)
        }),
    );

    let c = ctx.clone();
    router.register(
        Method::Get,
        "/",
        false,
        Box::new(move |_| login_page(&c.lock().unwrap())),
    );
    let c = ctx.clone();
    router.register(
        Method::Get,
        "/login",
        false,
        Box::new(move |_| login_page(&c.lock().unwrap())),
    );
    let c = ctx.clone();
    router.register(
        Method::Get,
        "/styles.css",
        false,
        Box::new(move |_| {
            let ctx = c.lock().unwrap();
            match ctx.config.read_file("styles.css") {
                Ok(Some(css)) => Response::css(css),
                _ => Response::css(""),
            }
        }),
    );
    let c = ctx.clone();
    router.register(
        Method::Post,
        "/login",
        false,
        Box::new(move |req| handle_login(req, &mut c.lock().unwrap())),
    );
    let c = ctx.clone();
    router.register(
        Method::Post,
        "/updatepass",
        true,
        Box::new(move |req| handle_update_pass(req, &mut c.lock().unwrap())),
    );

    for (path, tab, title) in [
        ("/home", "home", "Home"),
        ("/edit", "edit", "Edit"),
        ("/devices", "devices", "Devices"),
        ("/system", "system", "System"),
    ] {
        let c = ctx.clone();
        let file = format!("{}.html", tab);
        router.register(
            Method::Get,
            path,
            true,
            Box::new(move |_| {
                let ctx = c.lock().unwrap();
                Response::html(200, pages::page_with_menu(&ctx.config, &file, tab, title))
            }),
        );
    }

    let c = ctx.clone();
    router.register(
        Method::Post,
        "/logout",
        true,
        Box::new(move |req| handle_logout(req, &mut c.lock().unwrap())),
    );
    let c = ctx.clone();
    router.register(
        Method::Post,
        "/reboot",
        true,
        Box::new(move |_| {
            let mut ctx = c.lock().unwrap();
            ctx.pending = Some(PendingAction::Reboot);
            Response::text(200, "Rebooting...")
        }),
    );
    let c = ctx.clone();
    router.register(
        Method::Post,
        "/factoryreset",
        true,
        Box::new(move |req| {
            let mut ctx = c.lock().unwrap();
            if let Some(sid) = req.header("Cookie").and_then(crate::auth::session_id_from_cookie)
            {
                ctx.sessions.remove_session(&sid);
            }
            ctx.pending = Some(PendingAction::FactoryReset);
            Response::text(200, "Factory reset, rebooting...")
                .with_header("Set-Cookie", &AuthGate::logout_cookie())
        }),
    );
    let c = ctx.clone();
    router.register(
        Method::Post,
        "/update",
        true,
        Box::new(move |req| handle_firmware_update(req, &mut c.lock().unwrap())),
    );
    let c = ctx.clone();
    router.register(
        Method::Get,
        "/listfiles",
        true,
        Box::new(move |_| handle_list_files(&c.lock().unwrap())),
    );
    let c = ctx.clone();
    router.register(
        Method::Get,
        "/editfile",
        true,
        Box::new(move |req| handle_edit_file_get(req, &c.lock().unwrap())),
    );
    let c = ctx.clone();
    router.register(
        Method::Post,
        "/editfile",
        true,
        Box::new(move |req| handle_edit_file_post(req, &mut c.lock().unwrap())),
    );
    let c = ctx.clone();
    router.register(
        Method::Get,
        "/wifiscan",
        true,
        Box::new(move |_| {
            let mut ctx = c.lock().unwrap();
            ctx.scan.start();
            ctx.scan.poll();
            Response::json(ctx.scan.status_json())
        }),
    );
    let c = ctx.clone();
    router.register(
        Method::Get,
        "/devicename",
        true,
        Box::new(move |_| {
            let ctx = c.lock().unwrap();
            let name = serde_json::json!({ "name": ctx.config.record().effective_device_name() });
            Response::json(name.to_string())
        }),
    );
    let c = ctx;
    router.register(
        Method::Post,
        "/devicename",
        true,
        Box::new(move |req| handle_device_name_post(req, &mut c.lock().unwrap())),
    );

    router
}

fn login_page(ctx: &PortalContext) -> Response {
    Response::html(200, pages::load_file(&ctx.config, "login.html"))
}

fn handle_login(req: &Request, ctx: &mut PortalContext) -> Response {
    let (Some(user), Some(pass)) = (req.form_value("user"), req.form_value("pass")) else {
        return Response::text(400, "Missing fields");
    };

    // Check against the persisted document, not memory, so an edited
    // config takes effect without a reboot.
    let (stored_user, stored_pass) = match ctx.config.read_credentials() {
        Ok(creds) => creds,
        Err(e) => {
            log::error!("Could not read credentials: {e}");
            return Response::text(500, "Could not read user");
        }
    };

    if user != stored_user || pass != stored_pass {
        log::info!("Rejected login for '{user}'");
        return Response::html(
            403,
            pages::message_page(
                "Invalid Login",
                "Incorrect username or password.",
                "Try again",
                "/login",
            ),
        );
    }

    let sid = ctx.sessions.create_session();
    log::info!("Login successful");
    let cookie = AuthGate::login_cookie(&sid);

    // Un-rotated credentials: force a password change before anything
    // else. The session is still issued so the protected /updatepass
    // route is reachable from the prompt.
    if stored_pass == ctx.config.record().default_password {
        return Response::html(
            200,
            pages::load_file(&ctx.config, "defaultpass_prompt.html"),
        )
        .with_header("Set-Cookie", &cookie);
    }

    Response::redirect("/home").with_header("Set-Cookie", &cookie)
}

fn handle_update_pass(req: &Request, ctx: &mut PortalContext) -> Response {
    let Some(newpass) = req.form_value("newpass") else {
        return Response::text(400, "Missing new password");
    };
    if newpass.len() < MIN_PASSWORD_LEN {
        return Response::text(
            400,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        );
    }
    if let Err(e) = ctx.config.update_password(newpass) {
        log::error!("Password update failed: {e}");
        return Response::text(500, "Could not save password");
    }
    log::info!("Administrator password updated");
    handle_logout(req, ctx)
}

fn handle_logout(req: &Request, ctx: &mut PortalContext) -> Response {
    if let Some(sid) = req.header("Cookie").and_then(crate::auth::session_id_from_cookie) {
        ctx.sessions.remove_session(&sid);
    }
    Response::redirect("/login").with_header("Set-Cookie", &AuthGate::logout_cookie())
}

fn handle_firmware_update(req: &Request, ctx: &mut PortalContext) -> Response {
    let Some(updater) = ctx.updater.as_mut() else {
        return Response::text(500, "Firmware updates not supported");
    };
    log::info!("[OTA] Update start, {} bytes", req.body.len());
    let result = (|| {
        updater.begin()?;
        for chunk in req.body.chunks(UPDATE_CHUNK) {
            updater.write(chunk)?;
        }
        updater.finish()
    })();
    match result {
        Ok(()) => {
            log::info!("[OTA] Update success");
            ctx.pending = Some(PendingAction::Reboot);
            Response::text(200, "Update successful. Rebooting...")
        }
        Err(e) => {
            log::error!("[OTA] Update failed: {e}");
            Response::text(500, "Update failed!")
        }
    }
}

fn handle_list_files(ctx: &PortalContext) -> Response {
    match ctx.config.list_files() {
        Ok(files) => {
            let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
            Response::json(serde_json::json!(names).to_string())
        }
        Err(e) => {
            log::error!("listfiles failed: {e}");
            Response::text(500, "Could not list files")
        }
    }
}

fn handle_edit_file_get(req: &Request, ctx: &PortalContext) -> Response {
    let Some(name) = req.form_value("name") else {
        return Response::text(400, "Missing filename");
    };
    match ctx.config.read_file(name) {
        Ok(Some(content)) => Response::text(200, content),
        Ok(None) => Response::text(404, "File not found"),
        Err(e) => {
            log::error!("editfile read failed: {e}");
            Response::text(500, "Could not read file")
        }
    }
}

fn handle_edit_file_post(req: &Request, ctx: &mut PortalContext) -> Response {
    let (Some(name), Some(content)) = (req.form_value("name"), req.form_value("content")) else {
        return Response::text(400, "Missing params");
    };
    match ctx.config.write_file(name, content) {
        Ok(()) => Response::text(200, "File saved!"),
        Err(e) => {
            log::error!("editfile write failed: {e}");
            Response::text(500, "Could not open file for writing")
        }
    }
}

fn handle_device_name_post(req: &Request, ctx: &mut PortalContext) -> Response {
    let Some(name) = req.form_value("name") else {
        return Response::text(400, "Missing name");
    };
    match ctx.config.set_device_name(name) {
        Ok(()) => Response::json(r#"{"status":"ok"}"#),
        Err(e) => {
            log::error!("devicename save failed: {e}");
            Response::text(500, "Could not save device name")
        }
    }
}
