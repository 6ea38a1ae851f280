use std::sync::Arc;

use crate::{
    config::{AppConfig, VnPayConfig},
    db::{DbPool, OrmConn, orm_from_pool},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub vnpay: Arc<VnPayConfig>,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(pool: DbPool, config: &AppConfig) -> Self {
        Self {
            orm: orm_from_pool(&pool),
            pool,
            vnpay: Arc::new(config.vnpay.clone()),
            jwt_secret: Arc::from(config.jwt_secret.as_str()),
        }
    }
}
