use crate::config::SmtpConfig;
use crate::error::{Error, Result};
use crate::model::AttendanceType;
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::{Arc, Mutex};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Best-effort outbound message channel. Delivery failure never rolls back
/// the state change that triggered the send.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// SMTP delivery via lettre.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: lettre::message::Mailbox,
}

impl SmtpNotifier {
    pub fn new(cfg: &SmtpConfig) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
            .map_err(|e| Error::Notification(e.to_string()))?
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();
        let from = cfg
            .from
            .parse()
            .map_err(|_| Error::Notification("invalid from address".into()))?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let to = to
            .parse()
            .map_err(|_| Error::Notification(format!("invalid recipient: {to}")))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| Error::Notification(e.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| Error::Notification(e.to_string()))?;
        Ok(())
    }
}

/// Fallback when no SMTP relay is configured: the message only reaches the
/// log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        tracing::info!(%to, %subject, "no smtp relay configured, dropping notification");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Recording sink used by the test suites.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Mail>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().expect("notifier lock poisoned").clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.sent.lock().expect("notifier lock poisoned").push(Mail {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        });
        Ok(())
    }
}

/// Fire-and-forget delivery: the caller has already committed its state
/// change and must not block on (or fail with) the send.
pub fn spawn_send(notifier: Arc<dyn Notifier>, to: String, subject: String, body: String) {
    tokio::spawn(async move {
        if let Err(e) = notifier.send(&to, &subject, &body).await {
            tracing::warn!(error = %e, %to, "notification delivery failed");
        }
    });
}

fn fmt_date(date: OffsetDateTime) -> String {
    date.format(&Rfc3339).unwrap_or_else(|_| date.to_string())
}

/// Mail sent to the warden when a student files a new request.
pub fn request_created_mail(
    student_name: &str,
    kind: AttendanceType,
    start: OffsetDateTime,
    end: OffsetDateTime,
    reason: &str,
) -> (String, String) {
    let subject = format!("New {kind} Request");
    let body = format!(
        "Student {} has requested {} from {} to {}.\nReason: {}",
        student_name,
        kind,
        fmt_date(start),
        fmt_date(end),
        reason
    );
    (subject, body)
}

/// Mail sent to the student's registered address on approval.
pub fn request_approved_mail(
    kind: AttendanceType,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> (String, String) {
    let subject = format!("{kind} Request Approved");
    let body = format!(
        "Your {} request from {} to {} has been approved.",
        kind,
        fmt_date(start),
        fmt_date(end)
    );
    (subject, body)
}
