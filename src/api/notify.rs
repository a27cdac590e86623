//! Outbound SMS and email delivery behind pluggable senders.
//!
//! Delivery is a non-critical side effect of the auth flows: a send failure
//! or timeout is logged and audited, but the primary operation still
//! succeeds. Every send is timeout-bound so a slow provider cannot pin a
//! request task.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct SmsMessage {
    pub country_code: String,
    pub phone_number: String,
    pub body: String,
}

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, message: &SmsMessage) -> Result<()>;
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Development sender: logs instead of calling a provider.
#[derive(Clone, Debug)]
pub struct LogSmsSender;

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, message: &SmsMessage) -> Result<()> {
        info!(
            to = %format!("{}{}", message.country_code, message.phone_number),
            "sms send stub: {}",
            message.body
        );
        Ok(())
    }
}

/// Development sender: logs instead of calling a provider.
#[derive(Clone, Debug)]
pub struct LogMailSender;

#[async_trait]
impl MailSender for LogMailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "email send stub"
        );
        Ok(())
    }
}

/// Deliver an SMS on a spawned task, bounded by the send timeout.
pub fn spawn_sms(sender: Arc<dyn SmsSender>, message: SmsMessage) {
    tokio::spawn(async move {
        match tokio::time::timeout(SEND_TIMEOUT, sender.send(&message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("sms delivery failed: {err}"),
            Err(_) => error!("sms delivery timed out"),
        }
    });
}

/// Deliver an email on a spawned task, bounded by the send timeout.
pub fn spawn_email(sender: Arc<dyn MailSender>, message: EmailMessage) {
    tokio::spawn(async move {
        match tokio::time::timeout(SEND_TIMEOUT, sender.send(&message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("email delivery failed: {err}"),
            Err(_) => error!("email delivery timed out"),
        }
    });
}
