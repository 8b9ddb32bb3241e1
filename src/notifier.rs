// Email alert on fingerprint mismatch - using lettre

use crate::comparator::{MismatchAlert, Notifier};
use crate::error::CheckError;
use lettre::message::{header, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use std::time::Duration;

/// Subject line of every mismatch alert unless configured otherwise.
pub const DEFAULT_SUBJECT: &str = "SSL Fingerprint is changed, please check it ... !!";

/// SMTP login, read from the environment once at startup.
#[derive(Clone)]
pub struct MailCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for MailCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Mail transport settings.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub host: String,
    pub port: u16,
    /// STARTTLS upgrade instead of implicit TLS
    pub starttls: bool,
    pub sender_name: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub timeout: Duration,
}

/// Sends the alert through an authenticated SMTP relay.
pub struct EmailNotifier {
    settings: MailSettings,
    credentials: MailCredentials,
}

impl EmailNotifier {
    pub fn new(settings: MailSettings, credentials: MailCredentials) -> EmailNotifier {
        EmailNotifier {
            settings,
            credentials,
        }
    }

    /// Build the alert message
    pub fn build_message(&self, alert: &MismatchAlert) -> Result<Message, CheckError> {
        let address: Address = self.credentials.username.parse()?;
        let from = Mailbox::new(Some(self.settings.sender_name.clone()), address);

        let mut builder = Message::builder().from(from).subject(&self.settings.subject);
        for recipient in &self.settings.recipients {
            builder = builder.to(recipient.parse()?);
        }

        let message = builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(header::ContentType::TEXT_PLAIN)
                        .body(format_text_body(alert)),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(header::ContentType::TEXT_HTML)
                        .body(format_html_body(alert)),
                ),
        )?;
        Ok(message)
    }

    fn transport(&self) -> Result<SmtpTransport, CheckError> {
        let creds = Credentials::new(
            self.credentials.username.clone(),
            self.credentials.password.clone(),
        );

        let builder = if self.settings.starttls {
            SmtpTransport::starttls_relay(&self.settings.host)?
        } else {
            SmtpTransport::relay(&self.settings.host)?
        };

        Ok(builder
            .credentials(creds)
            .port(self.settings.port)
            .timeout(Some(self.settings.timeout))
            .build())
    }
}

impl Notifier for EmailNotifier {
    fn notify(&self, alert: &MismatchAlert) -> Result<(), CheckError> {
        let message = self.build_message(alert)?;
        let transport = self.transport()?;
        let response = transport.send(&message)?;
        tracing::info!(
            "Email sent to {} recipient(s): {}",
            self.settings.recipients.len(),
            response.code()
        );
        Ok(())
    }
}

/// Used when mail alerts are disabled: the mismatch is only logged.
pub struct LogOnlyNotifier;

impl Notifier for LogOnlyNotifier {
    fn notify(&self, alert: &MismatchAlert) -> Result<(), CheckError> {
        tracing::warn!(
            "Mail alerts disabled; not notifying about {} (expected {}, got {})",
            alert.target.address(),
            alert.expected,
            alert.actual
        );
        Ok(())
    }
}

fn format_html_body(alert: &MismatchAlert) -> String {
    format!(
        r#"<p>Please check the SSL Fingerprint</p>
<ul>
    <li><strong>Host:</strong> {}</li>
    <li><strong>Expected:</strong> <code>{}</code></li>
    <li><strong>Presented:</strong> <code>{}</code></li>
    <li><strong>Reference:</strong> {}</li>
    <li><strong>Detected:</strong> {}</li>
</ul>
<p>Thanks :)</p>"#,
        alert.target.address(),
        alert.expected,
        alert.actual,
        alert.target.reference_url,
        alert.detected_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

fn format_text_body(alert: &MismatchAlert) -> String {
    format!(
        "Please check the SSL Fingerprint\n\n\
        Host: {}\n\
        Expected: {}\n\
        Presented: {}\n\
        Reference: {}\n\
        Detected: {}\n",
        alert.target.address(),
        alert.expected,
        alert.actual,
        alert.target.reference_url,
        alert.detected_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}
