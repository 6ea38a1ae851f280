//! VNPay request signing and callback verification.
//!
//! Both directions sign the same canonical string: every non-empty `vnp_*`
//! field except the hash fields, ordered by key, form-urlencoded and joined
//! as `key=value&key=value`. The signature is lowercase hex HMAC-SHA512 over
//! that string keyed with the merchant hash secret.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use thiserror::Error;
use url::{Url, form_urlencoded};

type HmacSha512 = Hmac<Sha512>;

pub const FIELD_PREFIX: &str = "vnp_";
pub const SECURE_HASH: &str = "vnp_SecureHash";
pub const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";
pub const TXN_REF: &str = "vnp_TxnRef";
pub const AMOUNT: &str = "vnp_Amount";
pub const RESPONSE_CODE: &str = "vnp_ResponseCode";
pub const TRANSACTION_NO: &str = "vnp_TransactionNo";
pub const ORDER_INFO: &str = "vnp_OrderInfo";

/// The only response code that confirms a payment.
pub const SUCCESS_CODE: &str = "00";

/// Gateway timestamps are Vietnam local time (UTC+7).
const GATEWAY_UTC_OFFSET_SECS: i64 = 7 * 3600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VnPayError {
    #[error("amount must be a positive number of currency units")]
    InvalidAmount,

    #[error("invalid hash secret")]
    InvalidSecret,

    #[error("invalid gateway base url")]
    InvalidBaseUrl,
}

/// Converts a cart total into the gateway's minor-unit amount (x100).
pub fn to_minor_units(total: i64) -> Result<i64, VnPayError> {
    match total.checked_mul(100) {
        Some(amount) if amount > 0 => Ok(amount),
        _ => Err(VnPayError::InvalidAmount),
    }
}

/// Formats `at` as `yyyyMMddHHmmss` in gateway local time.
pub fn gateway_timestamp(at: DateTime<Utc>) -> String {
    (at.naive_utc() + Duration::seconds(GATEWAY_UTC_OFFSET_SECS))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

fn canonical_query(fields: &BTreeMap<String, String>) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter())
        .finish()
}

fn mac_for(fields: &BTreeMap<String, String>, secret: &str) -> Result<HmacSha512, VnPayError> {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).map_err(|_| VnPayError::InvalidSecret)?;
    mac.update(canonical_query(fields).as_bytes());
    Ok(mac)
}

/// Signs `fields` with `secret`, returning lowercase hex.
pub fn sign(fields: &BTreeMap<String, String>, secret: &str) -> Result<String, VnPayError> {
    Ok(hex::encode(mac_for(fields, secret)?.finalize().into_bytes()))
}

/// Outgoing payment request parameters.
#[derive(Debug, Clone, Default)]
pub struct PaymentRequest {
    fields: BTreeMap<String, String>,
}

impl PaymentRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field. Empty values are skipped, they never take part in the signature.
    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.fields.insert(key.to_string(), value);
        }
        self
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Composes the signed redirect url.
    pub fn into_url(self, base_url: &str, secret: &str) -> Result<String, VnPayError> {
        let mut url = Url::parse(base_url).map_err(|_| VnPayError::InvalidBaseUrl)?;
        let signature = sign(&self.fields, secret)?;
        let query = format!("{}&{SECURE_HASH}={signature}", canonical_query(&self.fields));
        url.set_query(Some(&query));
        Ok(url.into())
    }
}

/// Fields received on the return/IPN callback.
#[derive(Debug, Clone, Default)]
pub struct CallbackFields {
    fields: BTreeMap<String, String>,
    secure_hash: Option<String>,
}

impl CallbackFields {
    /// Keeps only `vnp_*` fields; anything else in the query is ignored.
    pub fn from_query<I, K, V>(query: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut callback = Self::default();
        for (key, value) in query {
            let key = key.into();
            let value = value.into();
            if !key.starts_with(FIELD_PREFIX) {
                continue;
            }
            match key.as_str() {
                SECURE_HASH => callback.secure_hash = Some(value),
                SECURE_HASH_TYPE => {}
                _ if value.is_empty() => {}
                _ => {
                    callback.fields.insert(key, value);
                }
            }
        }
        callback
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn secure_hash(&self) -> Option<&str> {
        self.secure_hash.as_deref()
    }

    /// `vnp_TxnRef` parsed as the numeric merchant reference.
    pub fn txn_ref(&self) -> Option<i64> {
        self.get(TXN_REF)?.trim().parse().ok()
    }

    pub fn amount(&self) -> Option<i64> {
        self.get(AMOUNT)?.trim().parse().ok()
    }

    pub fn response_code(&self) -> Option<&str> {
        self.get(RESPONSE_CODE)
    }

    pub fn is_success(&self) -> bool {
        self.response_code() == Some(SUCCESS_CODE)
    }

    /// Recomputes the signature and compares it in constant time.
    pub fn verify(&self, secret: &str) -> bool {
        let Some(received) = self.secure_hash.as_deref() else {
            return false;
        };
        let Ok(received) = hex::decode(received.trim()) else {
            return false;
        };
        match mac_for(&self.fields, secret) {
            Ok(mac) => mac.verify_slice(&received).is_ok(),
            Err(_) => false,
        }
    }
}
