//! # OAuth Callback Handler
//!
//! Landing page for the provider redirect. The exchange outcome is posted to
//! the opener window and the popup closes itself.

use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};

use crate::oauth_flow::{CallbackParams, ExchangeOutcome};
use crate::server::AppState;
use crate::session::PopupMessage;

/// Service name the UI listens for on Google popups.
pub const GOOGLE_SERVICE: &str = "google";

/// The message a finished exchange reports to the opener.
pub fn popup_message(service: &str, outcome: &ExchangeOutcome) -> PopupMessage {
    match outcome.failure() {
        None => PopupMessage::AuthSuccess {
            service: service.to_string(),
        },
        Some(failure) => PopupMessage::AuthError {
            service: service.to_string(),
            message: Some(failure.message.clone()),
        },
    }
}

/// JSON safe to embed inside an inline `<script>`.
fn script_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Renders the popup page that reports `message` to `app_origin`.
pub fn render_popup_page(message: &PopupMessage, app_origin: &str) -> String {
    let (title, detail) = match message {
        PopupMessage::AuthSuccess { .. } => ("Connected", "You can close this window.".to_string()),
        PopupMessage::AuthError { message, .. } => (
            "Connection failed",
            message
                .clone()
                .unwrap_or_else(|| "Authorization failed".to_string()),
        ),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body>
<p>{detail}</p>
<script>
(function () {{
  var payload = {payload};
  if (window.opener) {{
    window.opener.postMessage(payload, {origin});
  }}
  window.close();
}})();
</script>
</body>
</html>
"#,
        title = escape_html(title),
        detail = escape_html(&detail),
        payload = script_json(message),
        origin = script_json(&app_origin),
    )
}

/// Completes the Google sign-in popup
#[utoipa::path(
    get,
    path = "/oauth/google/callback",
    params(CallbackParams),
    responses(
        (status = 200, description = "Popup page reporting success", body = String, content_type = "text/html"),
        (status = 400, description = "Popup page reporting failure", body = String, content_type = "text/html")
    ),
    tag = "oauth"
)]
pub async fn google_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let outcome = state.oauth_flow().complete(params).await;
    let message = popup_message(GOOGLE_SERVICE, &outcome);
    let page = render_popup_page(&message, &state.config.app_origin);

    let status = if outcome.is_success() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };

    let mut response = (status, Html(page)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
