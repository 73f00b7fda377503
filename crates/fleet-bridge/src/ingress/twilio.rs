//! SMS ingress: an inbound Twilio-style webhook that turns a text message
//! into a Journal entry, a Board task, or a Log entry depending on an
//! optional prefix, replying with a TwiML envelope either way.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::stores::board::BoardStore;
use crate::stores::journal_log::TextStream;

#[derive(Clone)]
pub struct TwilioIngress {
    pub auth_token: Option<Arc<String>>,
    pub webhook_url: String,
    pub allowed_numbers: Option<Vec<String>>,
    pub journal: TextStream,
    pub log: TextStream,
    pub board: BoardStore,
}

enum Resource {
    Journal,
    Task,
    Log,
}

impl Resource {
    fn label(&self) -> &'static str {
        match self {
            Resource::Journal => "Journal entry",
            Resource::Task => "Task",
            Resource::Log => "Log entry",
        }
    }
}

pub async fn handle_webhook(State(state): State<TwilioIngress>, headers: HeaderMap, Form(params): Form<BTreeMap<String, String>>) -> Response {
    let Some(auth_token) = state.auth_token.as_deref() else {
        return twiml(StatusCode::SERVICE_UNAVAILABLE, "SMS ingress is not configured.");
    };

    let signature = headers.get("X-Twilio-Signature").and_then(|v| v.to_str().ok()).unwrap_or("");
    if !verify_signature(auth_token, &state.webhook_url, &params, signature) {
        return twiml(StatusCode::FORBIDDEN, "Signature verification failed.");
    }

    let from = params.get("From").map(String::as_str).unwrap_or("");
    if let Some(allowed) = &state.allowed_numbers {
        if !allowed.iter().any(|n| n == from) {
            return twiml(StatusCode::FORBIDDEN, "Sender is not allowed.");
        }
    }

    let body = params.get("Body").map(String::as_str).unwrap_or("");
    let (resource, payload) = match parse_prefix(body) {
        Some(parsed) => parsed,
        None => return twiml(StatusCode::BAD_REQUEST, "Message body is empty."),
    };

    let from = from.to_string();
    let result = match resource {
        Resource::Journal => state.journal.append(&payload, Some(from), None, Some(vec!["sms".into()])).await.map(|e| e.id),
        Resource::Log => state.log.append(&payload, Some(from), None, Some(vec!["sms".into()])).await.map(|e| e.id),
        Resource::Task => state.board.create(&payload, &from).await.map(|t| t.id),
    };

    match result {
        Ok(id) => twiml(StatusCode::OK, &format!("{} created ({id})", resource.label())),
        Err(err) => twiml(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

fn parse_prefix(body: &str) -> Option<(Resource, String)> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let lower = body.to_ascii_lowercase();
    let (resource, rest) = if let Some(rest) = strip_prefix(&lower, body, "journal:") {
        (Resource::Journal, rest)
    } else if let Some(rest) = strip_prefix(&lower, body, "j:") {
        (Resource::Journal, rest)
    } else if let Some(rest) = strip_prefix(&lower, body, "task:") {
        (Resource::Task, rest)
    } else if let Some(rest) = strip_prefix(&lower, body, "t:") {
        (Resource::Task, rest)
    } else if let Some(rest) = strip_prefix(&lower, body, "log:") {
        (Resource::Log, rest)
    } else if let Some(rest) = strip_prefix(&lower, body, "l:") {
        (Resource::Log, rest)
    } else {
        (Resource::Journal, body.to_string())
    };

    let payload = rest.trim().to_string();
    if payload.is_empty() {
        None
    } else {
        Some((resource, payload))
    }
}

fn strip_prefix(lower: &str, original: &str, prefix: &str) -> Option<String> {
    lower.strip_prefix(prefix).map(|_| original[prefix.len()..].to_string())
}

fn verify_signature(auth_token: &str, webhook_url: &str, params: &BTreeMap<String, String>, signature: &str) -> bool {
    let mut data = webhook_url.to_string();
    for (key, value) in params {
        data.push_str(key);
        data.push_str(value);
    }

    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()) else {
        return false;
    };
    mac.update(data.as_bytes());
    let expected = BASE64.encode(mac.finalize().into_bytes());

    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

fn twiml(status: StatusCode, message: &str) -> Response {
    let escaped = xml_escape(message);
    let body = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response><Message>{escaped}</Message></Response>");
    (status, [("Content-Type", "text/xml")], body).into_response()
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn ingress(auth_token: Option<&str>, allowed: Option<Vec<String>>) -> (TwilioIngress, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let journal = TextStream::open(dir.path().join("journal.jsonl")).await.unwrap();
        let log = TextStream::open(dir.path().join("log.jsonl")).await.unwrap();
        let board = BoardStore::open(dir.path().join("board.json")).await.unwrap();
        (
            TwilioIngress {
                auth_token: auth_token.map(|t| Arc::new(t.to_string())),
                webhook_url: "https://fleet.example/sms".into(),
                allowed_numbers: allowed,
                journal,
                log,
                board,
            },
            dir,
        )
    }

    fn sign(auth_token: &str, webhook_url: &str, params: &[(&str, &str)]) -> String {
        let sorted: BTreeMap<String, String> = params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        verify_and_return_signature(auth_token, webhook_url, &sorted)
    }

    fn verify_and_return_signature(auth_token: &str, webhook_url: &str, params: &BTreeMap<String, String>) -> String {
        let mut data = webhook_url.to_string();
        for (k, v) in params {
            data.push_str(k);
            data.push_str(v);
        }
        let mut mac = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()).unwrap();
        mac.update(data.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn app(state: TwilioIngress) -> Router {
        Router::new().route("/sms", post(handle_webhook)).with_state(state)
    }

    async fn post_form(router: Router, form: &str, signature: Option<&str>) -> Response {
        let mut req = Request::builder().method("POST").uri("/sms").header("Content-Type", "application/x-www-form-urlencoded");
        if let Some(sig) = signature {
            req = req.header("X-Twilio-Signature", sig);
        }
        let req = req.body(Body::from(form.to_string())).unwrap();
        router.oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn missing_auth_token_returns_503() {
        let (state, _dir) = ingress(None, None).await;
        let resp = post_form(app(state), "Body=hi&From=%2B1555", None).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn bad_signature_returns_403() {
        let (state, _dir) = ingress(Some("secret"), None).await;
        let resp = post_form(app(state), "Body=hi&From=%2B1555", Some("bogus")).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn valid_signature_with_no_prefix_creates_journal_entry() {
        let (state, _dir) = ingress(Some("secret"), None).await;
        let signature = sign("secret", &state.webhook_url, &[("Body", "hello there"), ("From", "+1555")]);
        let resp = post_form(app(state), "Body=hello+there&From=%2B1555", Some(&signature)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn task_prefix_dispatches_to_board() {
        let (state, _dir) = ingress(Some("secret"), None).await;
        let signature = sign("secret", &state.webhook_url, &[("Body", "task: fix the thing"), ("From", "+1555")]);
        let resp = post_form(app(state), "Body=task%3A+fix+the+thing&From=%2B1555", Some(&signature)).await;
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("Task created"));
    }

    #[tokio::test]
    async fn disallowed_sender_is_rejected() {
        let (state, _dir) = ingress(Some("secret"), Some(vec!["+1999".into()])).await;
        let signature = sign("secret", &state.webhook_url, &[("Body", "hi"), ("From", "+1555")]);
        let resp = post_form(app(state), "Body=hi&From=%2B1555", Some(&signature)).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn blank_payload_after_prefix_is_bad_request() {
        let (state, _dir) = ingress(Some("secret"), None).await;
        let signature = sign("secret", &state.webhook_url, &[("Body", "journal:   "), ("From", "+1555")]);
        let resp = post_form(app(state), "Body=journal%3A+++&From=%2B1555", Some(&signature)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
