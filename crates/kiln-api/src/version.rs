use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub const API_VERSION_HEADER: &str = "API-Version";
pub const SUPPORTED_HEADER: &str = "API-Versions-Supported";
pub const DEPRECATION_HEADER: &str = "Deprecation";

pub const SUPPORTED_VERSIONS: [&str; 2] = ["v1beta1", "v1"];
/// v1beta1 sunset instant; clients pinned to it should log a deprecation
/// warning after this time.
const V1BETA1_DEPRECATED_AT: i64 = 1767225600;

/// Every request must name the API version it speaks; every response carries
/// the supported set, and requests pinned to a deprecated version also get a
/// `Deprecation: @<unix-ts>` header.
pub async fn require_api_version(request: Request, next: Next) -> Response {
    let requested = request
        .headers()
        .get(API_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(version) = requested else {
        return version_error("missing API-Version header");
    };
    if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
        return version_error(format!(
            "unsupported API version '{version}'; supported: {}",
            SUPPORTED_VERSIONS.join(", ")
        ));
    }

    let mut response = next.run(request).await;
    let supported = SUPPORTED_VERSIONS.join(", ");
    if let Ok(value) = HeaderValue::from_str(&supported) {
        response.headers_mut().insert(SUPPORTED_HEADER, value);
    }
    if version == "v1beta1" {
        if let Ok(value) = HeaderValue::from_str(&format!("@{V1BETA1_DEPRECATED_AT}")) {
            response.headers_mut().insert(DEPRECATION_HEADER, value);
        }
    }
    response
}

fn version_error(message: impl Into<String>) -> Response {
    let mut response =
        (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() }))).into_response();
    if let Ok(value) = HeaderValue::from_str(&SUPPORTED_VERSIONS.join(", ")) {
        response.headers_mut().insert(SUPPORTED_HEADER, value);
    }
    response
}
