use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::time::Duration;

pub struct WhatsAppConfig {
    pub access_token: String,
    pub api_url: String,
}

impl WhatsAppConfig {
    pub fn from_env() -> Self {
        Self {
            access_token: std::env::var("WHATSAPP_ACCESS_TOKEN")
                .expect("WHATSAPP_ACCESS_TOKEN must be set"),
            api_url: std::env::var("WHATSAPP_API_URL")
                .unwrap_or_else(|_| "https://graph.facebook.com/v21.0".to_string()),
        }
    }
}

static WHATSAPP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build WhatsApp HTTP client")
});

/// Binary media fetched from the Graph API, with the mime type it reported.
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Send a plain-text message through the Cloud API. `phone_number_id` is the
/// business's sending number, `to` the recipient wa_id. Returns the
/// provider-assigned message id.
pub async fn send_text_message(
    phone_number_id: &str,
    to: &str,
    body: &str,
) -> Result<String, String> {
    let config = WhatsAppConfig::from_env();
    let url = format!("{}/{}/messages", config.api_url, phone_number_id);

    let payload = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": { "preview_url": false, "body": body }
    });

    let response = WHATSAPP_CLIENT
        .post(&url)
        .header("Authorization", format!("Bearer {}", config.access_token))
        .json(&payload)
        .send()
        .await
        .map_err(|e| format!("Failed to send WhatsApp request: {}", e))?;

    if !response.status().is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(format!("WhatsApp API error: {}", error_text));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| format!("Failed to read WhatsApp response: {}", e))?;

    // A 2xx without an id still counts as sent; synthesize one so the outbound
    // message row keeps a unique key.
    let message_id = body
        .get("messages")
        .and_then(|messages| messages.get(0))
        .and_then(|message| message.get("id"))
        .and_then(|id| id.as_str())
        .map(|id| id.to_string())
        .unwrap_or_else(|| format!("wamid.local.{}", uuid::Uuid::new_v4()));

    Ok(message_id)
}

/// Fetch inbound media. The Graph API hands out a short-lived CDN URL for the
/// media id first; the binary itself is fetched with the same bearer token.
pub async fn download_media(media_id: &str) -> Result<ImageData, String> {
    let config = WhatsAppConfig::from_env();
    let meta_url = format!("{}/{}", config.api_url, media_id);

    let response = WHATSAPP_CLIENT
        .get(&meta_url)
        .header("Authorization", format!("Bearer {}", config.access_token))
        .send()
        .await
        .map_err(|e| format!("Failed to request media metadata: {}", e))?;

    if !response.status().is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(format!("WhatsApp media metadata error: {}", error_text));
    }

    let meta: Value = response
        .json()
        .await
        .map_err(|e| format!("Failed to read media metadata: {}", e))?;

    let url = meta
        .get("url")
        .and_then(|url| url.as_str())
        .ok_or_else(|| "Media metadata carried no url".to_string())?;
    let mime_type = meta
        .get("mime_type")
        .and_then(|mime| mime.as_str())
        .unwrap_or("image/jpeg")
        .to_string();

    let media_response = WHATSAPP_CLIENT
        .get(url)
        .header("Authorization", format!("Bearer {}", config.access_token))
        .send()
        .await
        .map_err(|e| format!("Failed to download media: {}", e))?;

    if !media_response.status().is_success() {
        return Err(format!(
            "WhatsApp media download failed with status {}",
            media_response.status()
        ));
    }

    let bytes = media_response
        .bytes()
        .await
        .map_err(|e| format!("Failed to read media body: {}", e))?
        .to_vec();

    Ok(ImageData { bytes, mime_type })
}
