use axum::{extract::Request, http::header, middleware::Next, response::IntoResponse};

/// Paths ending in `/printable` serve self-contained HTML documents with
/// inline styles; everything else is JSON.
fn is_printable_route(path: &str) -> bool {
    path.ends_with("/printable")
}

pub async fn security_headers_middleware(req: Request, next: Next) -> impl IntoResponse {
    let printable = is_printable_route(req.uri().path());

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        header::HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        header::HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        header::HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        header::HeaderValue::from_static("DENY"),
    );

    if printable {
        headers.insert(
            header::CONTENT_SECURITY_POLICY,
            header::HeaderValue::from_static(
                "default-src 'none'; style-src 'unsafe-inline'; img-src data:; frame-ancestors 'none'",
            ),
        );
        headers.insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("private, no-store"),
        );
    } else {
        headers.insert(
            header::CONTENT_SECURITY_POLICY,
            header::HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_routes_are_detected_by_suffix() {
        assert!(is_printable_route("/admin/invoices/abc/printable"));
        assert!(!is_printable_route("/admin/invoices/abc"));
        assert!(!is_printable_route("/printable/abc"));
    }
}
