use crate::state::AppState;
use crate::types::{AppError, ErrorBody};
use crate::utils;
use axum::{
    extract::Request,
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::IntoResponse,
    Json,
};
use subtle::ConstantTimeEq;

/// Constant-time check of the admin token. Without a configured token every request fails.
pub fn check_admin_token(expected: Option<&str>, headers: &HeaderMap) -> Result<(), AppError> {
    let got = utils::header_admin_token(headers).or_else(|| utils::header_bearer_token(headers));
    match (expected, got.as_deref()) {
        (Some(expected), Some(g)) if g.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1 => {
            Ok(())
        }
        _ => Err(AppError::Forbidden("admin token required".into())),
    }
}

pub async fn require_admin_token(
    State(st): State<AppState>,
    req: Request,
    next: Next,
) -> impl IntoResponse {
    if let Err(e) = check_admin_token(st.cfg.admin_token.as_deref(), req.headers()) {
        return (
            e.status_code(),
            Json(ErrorBody {
                error: e.to_string(),
            }),
        )
            .into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    const TOKEN: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn admin_token_is_required_and_compared() {
        let mut headers = HeaderMap::new();
        let err = check_admin_token(Some(TOKEN), &headers).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        headers.insert("authorization", HeaderValue::from_static("Bearer wrong"));
        assert!(check_admin_token(Some(TOKEN), &headers).is_err());

        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {TOKEN}")).unwrap(),
        );
        assert!(check_admin_token(Some(TOKEN), &headers).is_ok());
        // No configured token locks the route.
        assert!(check_admin_token(None, &headers).is_err());
    }
}
