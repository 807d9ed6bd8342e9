use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, Transport};

/// SMTP settings for the reminder email channel. The channel is optional, so
/// missing configuration is reported to the caller instead of panicking.
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_address: String,
}

impl EmailConfig {
    pub fn from_env() -> Result<Self, String> {
        let smtp_host = std::env::var("SMTP_HOST").map_err(|_| "SMTP_HOST not set".to_string())?;
        let smtp_port = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(587);
        let smtp_username =
            std::env::var("SMTP_USERNAME").map_err(|_| "SMTP_USERNAME not set".to_string())?;
        let smtp_password =
            std::env::var("SMTP_PASSWORD").map_err(|_| "SMTP_PASSWORD not set".to_string())?;
        let from_address =
            std::env::var("SMTP_FROM").unwrap_or_else(|_| smtp_username.clone());
        Ok(EmailConfig {
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            from_address,
        })
    }
}

pub fn send_reminder_email(to: &str, subject: &str, body: &str) -> Result<(), String> {
    let config = EmailConfig::from_env()?;

    let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
    let mailer = lettre::SmtpTransport::starttls_relay(&config.smtp_host)
        .map_err(|e| format!("Failed to create SMTP relay: {}", e))?
        .port(config.smtp_port)
        .credentials(creds)
        .build();

    let email_message = Message::builder()
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| format!("Invalid sender address '{}': {}", config.from_address, e))?,
        )
        .to(to
            .parse()
            .map_err(|e| format!("Invalid recipient address '{}': {}", to, e))?)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| format!("Failed to build email message: {}", e))?;

    tracing::debug!(
        "Sending reminder email via {}:{}",
        config.smtp_host,
        config.smtp_port
    );
    mailer
        .send(&email_message)
        .map_err(|e| format!("SMTP send failed: {}", e))?;
    Ok(())
}
