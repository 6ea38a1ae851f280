use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Role;

#[derive(Deserialize, Debug, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    /// Bearer token, sent back as `Authorization: Bearer <token>`.
    pub token: String,
}

/// JWT payload. A token carrying a role outside `Role` fails to decode.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}
