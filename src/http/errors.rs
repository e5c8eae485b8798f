//! Default error pages

use http::StatusCode;

use super::types::ModuleResponse;

/// Minimal stylesheet shared by host-generated pages
pub const STYLESHEET: &str = "<head><style type=\"text/css\">body{margin:40px auto;max-width:650px;line-height:1.6;font-size:18px;color:#444;padding:0 10px}h1,h2,h3{line-height:1.2}</style></head>";

/// Escape text for inclusion in HTML
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the host's error page
///
/// The info paragraph is omitted when `message` is empty.
pub fn default_error_page(status: StatusCode, message: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    let mut body = format!(
        "<h1>There was an Error: {} {}</h1>",
        status.as_u16(),
        escape_html(reason)
    );
    if !message.is_empty() {
        body.push_str(&format!(
            "<p><b>Here is some additional Info: </b>{}</p>",
            escape_html(message)
        ));
    }
    format!("<!DOCTYPE html><html>{}<body>{}</body></html>", STYLESHEET, body)
}

/// Wrap an error page body in a response with the given status
pub fn error_response(status: StatusCode, page: String) -> ModuleResponse {
    ModuleResponse::html(page).with_status(status)
}
