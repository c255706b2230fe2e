// ===============================
// src/signing.rs
// ===============================
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ExecutionError;

type HmacSha256 = Hmac<Sha256>;

pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Hex-encoded HMAC-SHA256 of `message` keyed by `secret`.
pub fn sign(secret: &str, message: &str) -> Result<String, ExecutionError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExecutionError::SignatureError(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Sort params by key and join them as `k=v&...` with URL-encoded values.
/// The exchange verifies the signature against exactly this string.
pub fn canonical_query(params: &[(&str, String)]) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Canonical query with `signature` appended.
pub fn signed_query(secret: &str, params: &[(&str, String)]) -> Result<String, ExecutionError> {
    let query = canonical_query(params);
    let sig = sign(secret, &query)?;
    Ok(format!("{query}&signature={sig}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // Contoh dari dokumentasi Binance (SIGNED endpoint security)
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn query_is_sorted_by_key() {
        let params = [
            ("type", "MARKET".to_string()),
            ("symbol", "XRPUSDT".to_string()),
            ("side", "BUY".to_string()),
            ("quoteOrderQty", "49.5000".to_string()),
            ("timestamp", "1000".to_string()),
        ];
        assert_eq!(
            canonical_query(&params),
            "quoteOrderQty=49.5000&side=BUY&symbol=XRPUSDT&timestamp=1000&type=MARKET"
        );
    }

    #[test]
    fn signature_is_over_the_sorted_query() {
        let params = [("b", "2".to_string()), ("a", "1".to_string())];
        let signed = signed_query("secret", &params).unwrap();
        let expected = format!("a=1&b=2&signature={}", sign("secret", "a=1&b=2").unwrap());
        assert_eq!(signed, expected);
    }

    #[test]
    fn values_are_url_encoded() {
        let params = [("newClientOrderId", "sig bot/1".to_string())];
        assert_eq!(canonical_query(&params), "newClientOrderId=sig%20bot%2F1");
    }
}
