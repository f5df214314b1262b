//! Page rendering: plain `{placeholder}` substitution over HTML loaded
//! from storage, with compact built-in fallbacks so the portal is usable
//! before any UI assets are flashed.

use crate::config::ConfigStore;

pub const NOT_FOUND_HTML: &str = "<h2>404 Not Found</h2>";

pub const LOGIN_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta name="viewport" content="width=device-width, initial-scale=1">
<link rel="stylesheet" href="/styles.css">
<title>Login</title>
</head>
<body>
<div class="container">
<h2>Device Login</h2>
<form method="POST" action="/login">
<label>Username</label><input name="user" autocomplete="username">
<label>Password</label><input name="pass" type="password" autocomplete="current-password">
<button type="submit">Sign in</button>
</form>
</div>
</body>
</html>
"#;

pub const DEFAULTPASS_PROMPT_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta name="viewport" content="width=device-width, initial-scale=1">
<link rel="stylesheet" href="/styles.css">
<title>Change Password</title>
</head>
<body>
<div class="container">
<h2>Default password in use</h2>
<p>Pick a new administrator password (minimum 8 characters) to continue.</p>
<form method="POST" action="/updatepass">
<label>New password</label><input name="newpass" type="password" autocomplete="new-password">
<button type="submit">Save</button>
</form>
</div>
</body>
</html>
"#;

pub const TABMENU_HTML: &str = r#"<nav class="tabs">
<a class="{home}" href="/home">Home</a>
<a class="{devices}" href="/devices">Devices</a>
<a class="{system}" href="/system">System</a>
</nav>
"#;

/// Replaces every `{key}` with its value. Unknown placeholders are left
/// in place.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// File from storage, or the named built-in, or a 404 stub.
pub fn load_file(store: &ConfigStore, path: &str) -> String {
    if let Ok(Some(contents)) = store.read_file(path) {
        return contents;
    }
    match path.trim_start_matches('/') {
        "login.html" => LOGIN_HTML.to_string(),
        "defaultpass_prompt.html" => DEFAULTPASS_PROMPT_HTML.to_string(),
        "tabmenu.html" => TABMENU_HTML.to_string(),
        _ => NOT_FOUND_HTML.to_string(),
    }
}

/// Wraps a body page with the standard head and the tab menu, marking
/// `active_tab` as selected.
pub fn page_with_menu(store: &ConfigStore, file: &str, active_tab: &str, title: &str) -> String {
    let menu = render(
        &load_file(store, "tabmenu.html"),
        &[
            ("home", active_class(active_tab, "home")),
            ("devices", active_class(active_tab, "devices")),
            ("system", active_class(active_tab, "system")),
        ],
    );

    let mut html = String::from("<!DOCTYPE html><html><head>");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">");
    html.push_str("<link rel=\"stylesheet\" href=\"/styles.css\">");
    html.push_str(&format!("<title>{title}</title>"));
    html.push_str("</head><body>");
    html.push_str(&menu);
    html.push_str(&load_file(store, file));
    html.push_str("</body></html>");
    html
}

/// Styled mobile-friendly message page with a single action button.
pub fn message_page(title: &str, message: &str, button_text: &str, target: &str) -> String {
    let mut html = String::from("<!DOCTYPE html><html><head>");
    html.push_str("<meta name='viewport' content='width=device-width, initial-scale=1'>");
    html.push_str("<link rel='stylesheet' href='/styles.css'>");
    html.push_str(&format!("<title>{title}</title>"));
    html.push_str("</head><body>");
    html.push_str("<div class='container message'>");
    html.push_str(&format!("<h2>{title}</h2><p>{message}</p>"));
    html.push_str(&format!("<a class='button' href='{target}'>{button_text}</a>"));
    html.push_str("</div></body></html>");
    html
}

fn active_class(active_tab: &str, tab: &str) -> &'static str {
    if active_tab == tab {
        "active"
    } else {
        ""
    }
}
