use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};

/// Best-effort client address for `vnp_IpAddr`, read from proxy headers.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

const FALLBACK_IP: &str = "127.0.0.1";

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let real_ip = parts
            .headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let ip = forwarded.or(real_ip).unwrap_or(FALLBACK_IP);
        Ok(ClientIp(ip.to_string()))
    }
}
