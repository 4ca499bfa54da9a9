//! Page rendering.
//!
//! The dashboard page is a static template with a handful of substituted
//! values; everything dynamic arrives later over the persistent
//! connection. Substituted values are HTML-escaped, except the QR markup a
//! renderer produces itself.

use visitrack_core::visitor::escape_html;
use visitrack_core::SessionId;

const DASHBOARD_TEMPLATE: &str = include_str!("../assets/index.html");
const REJECTION_TEMPLATE: &str = include_str!("../assets/rejected.html");

/// Values the dashboard page is rendered with.
#[derive(Debug, Clone)]
pub struct DashboardPage<'a> {
    pub session_id: &'a SessionId,
    pub ip: &'a str,
    /// Shareable URL of this page.
    pub url: &'a str,
    /// Path of the persistent-connection endpoint.
    pub ws_path: &'a str,
    pub heartbeat_interval_secs: u64,
}

pub trait PageRenderer: Send + Sync {
    fn render_dashboard(&self, page: &DashboardPage<'_>) -> String;

    /// Body for a refused page load.
    fn render_rejection(&self, title: &str, message: &str) -> String;

    /// Inline SVG encoding `url` as a QR code, shown next to the share link.
    /// `None` leaves the slot empty.
    fn render_qr(&self, _url: &str) -> Option<String> {
        None
    }
}

/// Renders the bundled HTML templates. Carries no QR encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl PageRenderer for HtmlRenderer {
    fn render_dashboard(&self, page: &DashboardPage<'_>) -> String {
        dashboard_html(page, self.render_qr(page.url))
    }

    fn render_rejection(&self, title: &str, message: &str) -> String {
        fill(
            REJECTION_TEMPLATE,
            &[("title", escape_html(title)), ("message", escape_html(message))],
        )
    }
}

/// The bundled dashboard with `qr` markup, if any, in its QR slot.
///
/// Renderers that only add a QR encoder call this from `render_dashboard`.
pub fn dashboard_html(page: &DashboardPage<'_>, qr: Option<String>) -> String {
    fill(
        DASHBOARD_TEMPLATE,
        &[
            ("session_id", escape_html(page.session_id.as_str())),
            ("ip", escape_html(page.ip)),
            ("url", escape_html(page.url)),
            ("ws_path", escape_html(page.ws_path)),
            ("heartbeat_ms", (page.heartbeat_interval_secs * 1000).to_string()),
            ("qr", qr.unwrap_or_default()),
        ],
    )
}

/// Replace each `{{name}}` in one pass over `template`. Inserted values are
/// never scanned again, so a value that looks like a placeholder stays put.
/// Unknown placeholders are left as they are.
fn fill(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };
        let name = &after[..end];
        match values.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
