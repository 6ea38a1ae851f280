use std::env;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub vnpay: VnPayConfig,
}

/// Merchant settings issued by VNPay.
#[derive(Debug, Clone)]
pub struct VnPayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    pub base_url: String,
    pub version: String,
    pub curr_code: String,
    pub locale: String,
    /// Used when the client does not supply its own return url.
    pub return_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            vnpay: VnPayConfig::from_env()?,
        })
    }
}

impl VnPayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            tmn_code: env::var("VNPAY_TMN_CODE").context("VNPAY_TMN_CODE is not set")?,
            hash_secret: env::var("VNPAY_HASH_SECRET").context("VNPAY_HASH_SECRET is not set")?,
            base_url: env::var("VNPAY_BASE_URL").unwrap_or_else(|_| {
                "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string()
            }),
            version: env::var("VNPAY_VERSION").unwrap_or_else(|_| "2.1.0".to_string()),
            curr_code: env::var("VNPAY_CURR_CODE").unwrap_or_else(|_| "VND".to_string()),
            locale: env::var("VNPAY_LOCALE").unwrap_or_else(|_| "vn".to_string()),
            return_url: env::var("VNPAY_RETURN_URL").context("VNPAY_RETURN_URL is not set")?,
        })
    }
}
