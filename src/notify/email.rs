use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message as Mail};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use serde::Deserialize;

use super::{Message, NotificationSink};

#[derive(Debug, Clone, Deserialize)]
pub struct EmailOptions {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    pub pass: String,
    pub from: String,
    pub to: String,
}

pub struct EmailSink {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailSink {
    pub fn new(opts: EmailOptions) -> Result<Self> {
        let creds = Credentials::new(opts.user, opts.pass);
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&opts.host)
            .with_context(|| format!("invalid SMTP host `{}`", opts.host))?
            .credentials(creds);
        if let Some(port) = opts.port {
            builder = builder.port(port);
        }

        let from = opts
            .from
            .parse()
            .with_context(|| format!("invalid from address `{}`", opts.from))?;
        let to = opts
            .to
            .parse()
            .with_context(|| format!("invalid to address `{}`", opts.to))?;

        Ok(Self {
            mailer: builder.build(),
            from,
            to,
        })
    }
}

#[async_trait::async_trait]
impl NotificationSink for EmailSink {
    async fn send(&self, msg: &Message) -> Result<()> {
        let subject = format!("{}: {}", msg.title, msg.body);
        let body = format!(
            "{}\n\n{}\n{}\n\nevent id: {}\n",
            msg.title,
            msg.body,
            msg.link.as_deref().unwrap_or_default(),
            msg.id
        );

        let mail = Mail::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email")?;

        self.mailer.send(mail).await.context("send email")?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "email"
    }
}
