//! Response envelopes: typed values that render to a status line, headers and body.

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::Cookie;
use serde_json::Value;

pub const XML_PREFIX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
pub const XML_ROOT: &str = "xml";

/// Body of a JSON or XML envelope. `code` 0 means 200; an empty `msg` means the canonical reason.
#[derive(Clone, Debug, Default)]
pub struct DataResponse {
    pub code: u16,
    pub msg: String,
    pub data: Option<Value>,
    pub cookies: Vec<Cookie<'static>>,
}

impl DataResponse {
    pub fn new(data: Value) -> Self {
        DataResponse {
            data: Some(data),
            ..DataResponse::default()
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    pub fn with_cookie(mut self, cookie: Cookie<'static>) -> Self {
        self.cookies.push(cookie);
        self
    }
}

#[derive(Clone, Debug)]
pub enum Envelope {
    Text { code: u16, content: String },
    Html { code: u16, content: Bytes },
    /// 303 See Other.
    Redirect { location: String },
    Json(DataResponse),
    Xml(DataResponse),
    /// JSON or XML by case-insensitive `kind`; anything but `xml` is JSON.
    Data { kind: String, body: DataResponse },
}

impl Envelope {
    pub fn text(code: u16, content: impl Into<String>) -> Self {
        Envelope::Text {
            code,
            content: content.into(),
        }
    }

    pub fn html(code: u16, content: impl Into<Bytes>) -> Self {
        Envelope::Html {
            code,
            content: content.into(),
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Envelope::Redirect {
            location: location.into(),
        }
    }

    pub fn json(data: Value) -> Self {
        Envelope::Json(DataResponse::new(data))
    }

    pub fn xml(data: Value) -> Self {
        Envelope::Xml(DataResponse::new(data))
    }

    /// Collapse `Data` into the concrete variant it selects.
    pub fn resolve(self) -> Self {
        match self {
            Envelope::Data { kind, body } if kind.eq_ignore_ascii_case("xml") => Envelope::Xml(body),
            Envelope::Data { body, .. } => Envelope::Json(body),
            other => other,
        }
    }
}

fn status(code: u16) -> StatusCode {
    match code {
        0 => StatusCode::OK,
        code => StatusCode::from_u16(code).unwrap_or_else(|_| {
            tracing::warn!(code, "invalid status code in envelope");
            StatusCode::INTERNAL_SERVER_ERROR
        }),
    }
}

fn encode_xml(data: &Value) -> Result<String, String> {
    quick_xml::se::to_string_with_root(XML_ROOT, data).map_err(|e| e.to_string())
}

fn render_data(resp: DataResponse, content_type: &'static str, xml: bool) -> Response {
    let code = status(resp.code);
    let mut body = Vec::new();
    if xml {
        body.extend_from_slice(XML_PREFIX.as_bytes());
    }
    if let Some(data) = &resp.data {
        let encoded = if xml {
            encode_xml(data).map(String::into_bytes)
        } else {
            serde_json::to_vec(data).map_err(|e| e.to_string())
        };
        match encoded {
            Ok(bytes) => body.extend(bytes),
            Err(e) => {
                tracing::error!(error = %e, "envelope encoding failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "encoding error").into_response();
            }
        }
    }

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = code;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    for cookie in &resp.cookies {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(v) => {
                headers.append(header::SET_COOKIE, v);
            }
            Err(_) => tracing::warn!(cookie = %cookie.name(), "dropping unencodable cookie"),
        }
    }
    if !resp.msg.is_empty() && Some(resp.msg.as_str()) != code.canonical_reason() {
        if let Ok(reason) = hyper::ext::ReasonPhrase::try_from(resp.msg.into_bytes()) {
            response.extensions_mut().insert(reason);
        }
    }
    response
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        match self {
            data @ Envelope::Data { .. } => data.resolve().into_response(),
            Envelope::Text { code, content } => (
                status(code),
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                content,
            )
                .into_response(),
            Envelope::Html { code, content } => (
                status(code),
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                content,
            )
                .into_response(),
            Envelope::Redirect { location } => match HeaderValue::from_str(&location) {
                Ok(loc) => (StatusCode::SEE_OTHER, [(header::LOCATION, loc)]).into_response(),
                Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect location").into_response(),
            },
            Envelope::Json(resp) => render_data(resp, "application/json", false),
            Envelope::Xml(resp) => render_data(resp, "application/xml", true),
        }
    }
}
