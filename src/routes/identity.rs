use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    error::{AppError, ServiceError},
    services::identity_service::normalize_address,
};

/// Header carrying the address of the wallet connected in the browser.
pub const WALLET_ADDRESS_HEADER: &str = "x-wallet-address";

/// Normalised identity of the caller, taken from `X-Wallet-Address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletIdentity(pub String);

impl<S> FromRequestParts<S> for WalletIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(WALLET_ADDRESS_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(normalize_address)
            .map(WalletIdentity)
            .ok_or_else(|| {
                ServiceError::IdentityUnavailable(
                    "missing wallet address header `X-Wallet-Address`".into(),
                )
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(header: Option<&str>) -> Result<WalletIdentity, AppError> {
        let mut builder = Request::builder().uri("/quizzes");
        if let Some(value) = header {
            builder = builder.header("X-Wallet-Address", value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        WalletIdentity::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn header_is_normalised() {
        let identity = extract(Some(" 0xAbC ")).await.unwrap();
        assert_eq!(identity, WalletIdentity("0xabc".into()));
    }

    #[tokio::test]
    async fn missing_or_blank_header_is_unauthorized() {
        assert!(matches!(extract(None).await, Err(AppError::Unauthorized(_))));
        assert!(matches!(extract(Some("  ")).await, Err(AppError::Unauthorized(_))));
    }
}
