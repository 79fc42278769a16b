//! Minimal inline pages for the login form and the client-mode shells.
//!
//! Real deployments put a proper template engine in front of these; the
//! handlers only need something that carries the mode selection, an error
//! message, and the game embed parameters.
//!
//! The embed points at `/kcs/mainD2.swf`, which this gateway does not serve:
//! only the world-image subpath of `/kcs` is routed. A deployment that wants
//! browser mode to work must serve the game's `kcs` asset tree (the swf and
//! its resources) at that prefix, from a static directory or a fronting web
//! server.

/// The login form, optionally with an error message from a failed attempt.
pub fn form(mode: i64, errmsg: Option<&str>) -> String {
    let error = match errmsg {
        Some(msg) => format!(r#"<p class="error">{msg}</p>"#),
        None => String::new(),
    };
    let selected = |m: i64| if m == mode { " selected" } else { "" };
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>kcbridge</title></head>
<body>
{error}
<form method="post" action="/">
  <input type="text" name="login_id" placeholder="Login ID">
  <input type="password" name="password" placeholder="Password">
  <select name="mode">
    <option value="1"{s1}>Browser</option>
    <option value="2"{s2}>Viewer</option>
    <option value="3"{s3}>Poi</option>
    <option value="4"{s4}>Direct connector</option>
  </select>
  <button type="submit">Login</button>
</form>
</body>
</html>"#,
        error = error,
        s1 = selected(1),
        s2 = selected(2),
        s3 = selected(3),
        s4 = selected(4),
    )
}

/// Browser-mode page: embeds the game flash directly.
pub fn normal(scheme: &str, host: &str, token: &str, starttime: i64, world_ip: &str) -> String {
    let flash = flash_embed(scheme, host, token, starttime, world_ip);
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>kcbridge</title></head>
<body style="margin:0">{flash}</body>
</html>"#
    )
}

/// Viewer-mode page: an iframe the desktop viewers load.
pub fn kcv() -> String {
    r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>kcbridge</title></head>
<body style="margin:0"><iframe src="/flash" width="800" height="480" frameborder="0"></iframe></body>
</html>"#
        .to_string()
}

/// Bare flash page, used inside the viewer iframe.
pub fn flash(scheme: &str, host: &str, token: &str, starttime: i64, world_ip: &str) -> String {
    let flash = flash_embed(scheme, host, token, starttime, world_ip);
    format!(r#"<!DOCTYPE html><html><body style="margin:0">{flash}</body></html>"#)
}

/// Poi-mode page: same embed, sized for the poi browser.
pub fn poi(scheme: &str, host: &str, token: &str, starttime: i64, world_ip: &str) -> String {
    normal(scheme, host, token, starttime, world_ip)
}

/// Direct-connector page: hands the embedded game URL to the client.
pub fn connector(osapi_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>kcbridge</title></head>
<body><iframe src="{osapi_url}" width="100%" height="100%" frameborder="0"></iframe></body>
</html>"#
    )
}

fn flash_embed(scheme: &str, host: &str, token: &str, starttime: i64, world_ip: &str) -> String {
    // The swf is served through this gateway so its API calls come back here;
    // world_ip rides along for the world image route.
    format!(
        r#"<embed src="{scheme}://{host}/kcs/mainD2.swf?api_token={token}&amp;api_starttime={starttime}&amp;world_ip={world_ip}" width="800" height="480">"#
    )
}
