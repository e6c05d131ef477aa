use axum::http::{header, HeaderMap};

pub fn header_admin_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.contains('\r') && !s.contains('\n'))
        .filter(|s| !s.is_empty())
}

pub fn header_bearer_token(headers: &HeaderMap) -> Option<String> {
    let v = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    if v.contains('\r') || v.contains('\n') {
        return None;
    }
    let t = v.strip_prefix("Bearer ")?.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}
