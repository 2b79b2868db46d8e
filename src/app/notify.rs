use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Posts a markdown card to the chat webhook. Fire-and-forget: the caller
/// logs the returned error but the batch result never depends on it.
pub async fn send_webhook(
    webhook_url: &str,
    secret: Option<&str>,
    title: &str,
    text: &str,
) -> Result<(), String> {
    let url = match secret {
        Some(secret) if !secret.is_empty() => {
            signed_url(webhook_url, secret, Utc::now().timestamp_millis())?
        }
        _ => webhook_url.to_string(),
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|err| format!("webhook client: {err}"))?;
    let body = json!({
        "msgtype": "markdown",
        "markdown": { "title": title, "text": text },
    });
    let response = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|err| format!("webhook request: {err}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("webhook answered HTTP {status}"));
    }
    // The bot API reports application-level failures in the body.
    if let Ok(payload) = response.json::<serde_json::Value>().await {
        let errcode = payload.get("errcode").and_then(|v| v.as_i64()).unwrap_or(0);
        if errcode != 0 {
            let errmsg = payload
                .get("errmsg")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(format!("webhook rejected message: {errcode} {errmsg}"));
        }
    }
    info!("webhook notification sent");
    Ok(())
}

/// Appends the bot signature: HMAC-SHA256 over `"{timestamp}\n{secret}"`
/// keyed with the secret, base64- then percent-encoded.
fn signed_url(webhook_url: &str, secret: &str, timestamp_ms: i64) -> Result<String, String> {
    let payload = format!("{timestamp_ms}\n{secret}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| format!("webhook secret unusable: {err}"))?;
    mac.update(payload.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());
    let encoded: String = url::form_urlencoded::byte_serialize(signature.as_bytes()).collect();

    let separator = if webhook_url.contains('?') { '&' } else { '?' };
    Ok(format!(
        "{webhook_url}{separator}timestamp={timestamp_ms}&sign={encoded}"
    ))
}

/// Convenience wrapper used at the end of a batch run.
pub async fn notify_completion(
    webhook_url: &str,
    secret: Option<&str>,
    title: &str,
    text: &str,
) {
    if let Err(err) = send_webhook(webhook_url, secret, title, text).await {
        warn!(error = %err, "webhook notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_url_appends_timestamp_and_signature() {
        let url = signed_url(
            "https://bot.test/send?access_token=abc",
            "SECxyz",
            1_700_000_000_000,
        )
        .expect("signed");
        assert!(url.starts_with("https://bot.test/send?access_token=abc&timestamp=1700000000000&sign="));
        let sign = url.rsplit_once("sign=").expect("sign param").1;
        assert!(!sign.is_empty());
        // base64 specials must arrive percent-encoded
        assert!(!sign.contains('=') && !sign.contains('/'));
    }

    #[test]
    fn signing_is_deterministic_per_timestamp() {
        let a = signed_url("https://bot.test/send?t=1", "SEC", 42).expect("a");
        let b = signed_url("https://bot.test/send?t=1", "SEC", 42).expect("b");
        let c = signed_url("https://bot.test/send?t=1", "SEC", 43).expect("c");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn unsigned_url_uses_query_separator() {
        let url = signed_url("https://bot.test/send", "SEC", 1).expect("signed");
        assert!(url.contains("/send?timestamp=1&"));
    }
}
