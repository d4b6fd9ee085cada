//! HTTP transport layers: request ids, tracing, CORS, timeouts, and the
//! security and timing headers stamped on every response.

use std::time::Instant;

use axum::extract::Request;
use axum::http::header::{
    HeaderName, AUTHORIZATION, CONTENT_SECURITY_POLICY, REFERRER_POLICY,
    STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::auth::X_API_KEY;
use super::config::NetworkConfig;
use super::handlers::X_REQUEST_ID;

pub const X_RESPONSE_TIME: &str = "x-response-time";

const CSP_POLICY: &str = "default-src 'self'";
const HSTS_POLICY: &str = "max-age=31536000";

type SetHeader = SetResponseHeaderLayer<HeaderValue>;

type SecurityHeaders = Stack<
    SetHeader,
    Stack<SetHeader, Stack<SetHeader, Stack<SetHeader, Stack<SetHeader, Stack<SetHeader, Identity>>>>>,
>;

type HttpLayers = Stack<
    PropagateRequestIdLayer,
    Stack<
        TimeoutLayer,
        Stack<
            CorsLayer,
            Stack<
                CompressionLayer,
                Stack<
                    TraceLayer<
                        tower_http::classify::SharedClassifier<
                            tower_http::classify::ServerErrorsAsFailures,
                        >,
                    >,
                    Stack<
                        SetRequestIdLayer<MakeRequestUuid>,
                        Stack<SecurityHeaders, Stack<SetSensitiveRequestHeadersLayer, Identity>>,
                    >,
                >,
            >,
        >,
    >,
>;

/// Builds the HTTP-level Tower middleware stack from the network configuration.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetSensitiveRequestHeaders` -- marks `Authorization` and `X-API-Key` so traces never print them
/// 2. Security headers -- `nosniff`, frame denial, referrer policy, CSP and HSTS on every response
/// 3. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` unless the caller sent one
/// 4. `Tracing` -- logs request/response with structured trace spans
/// 5. `Compression` -- gzip response compression
/// 6. `CORS` -- origins from configuration
/// 7. `Timeout` -- answers 408 once `request_timeout` elapses
/// 8. `PropagateRequestId` -- copies `X-Request-Id` from the request to the response
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static(X_REQUEST_ID);
    let sensitive = [AUTHORIZATION, HeaderName::from_static(X_API_KEY)];

    let cors = build_cors_layer(&config.cors_origins);

    ServiceBuilder::new()
        .layer(SetSensitiveRequestHeadersLayer::new(sensitive))
        .layer(security_headers())
        .layer(SetRequestIdLayer::new(
            x_request_id.clone(),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Response headers set on every answer unless a handler already set them.
fn security_headers() -> SecurityHeaders {
    ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CSP_POLICY),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(HSTS_POLICY),
        ))
        .into_inner()
}

/// Stamps `X-Response-Time` as seconds with millisecond precision.
pub async fn stamp_response_time(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = format!("{:.3}s", started.elapsed().as_secs_f64());
    if let Ok(value) = HeaderValue::from_str(&elapsed) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(X_RESPONSE_TIME), value);
    }
    response
}

/// `"*"` allows any origin; otherwise unparsable origins are skipped.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}
