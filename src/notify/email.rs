use lettre::{
    Message, SmtpTransport, Transport,
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
};
use log::info;

use super::{Notifier, NotifyError};
use crate::config::EmailConfig;

/// Sends alerts over SMTP with implicit TLS.
pub struct EmailNotifier {
    from: Mailbox,
    receivers: Vec<Mailbox>,
    transport: SmtpTransport,
}

impl EmailNotifier {
    pub fn from_config(config: &EmailConfig) -> Result<Self, NotifyError> {
        let from = sender_mailbox(&config.sender, &config.username)?;
        let receivers = config
            .receivers
            .iter()
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                raw.parse::<Mailbox>()
                    .map_err(|err| NotifyError::Build(format!("invalid receiver {raw}: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if receivers.is_empty() {
            return Err(NotifyError::Build("no alert receivers configured".to_string()));
        }

        let transport = SmtpTransport::relay(&config.smtp_host)
            .map_err(|err| NotifyError::Build(format!("invalid SMTP host: {err}")))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self {
            from,
            receivers,
            transport,
        })
    }

    fn build_message(&self, subject: &str, text: &str, html: &str) -> Result<Message, NotifyError> {
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for receiver in &self.receivers {
            builder = builder.to(receiver.clone());
        }
        builder
            .multipart(MultiPart::alternative_plain_html(
                text.to_string(),
                html.to_string(),
            ))
            .map_err(|err| NotifyError::Build(err.to_string()))
    }
}

impl Notifier for EmailNotifier {
    fn notify(&self, subject: &str, text: &str, html: &str) -> Result<(), NotifyError> {
        let message = self.build_message(subject, text, html)?;
        self.transport
            .send(&message)
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        info!(
            "[alert] sent \"{subject}\" to {} receiver(s)",
            self.receivers.len()
        );
        Ok(())
    }
}

/// `"<sender> <username>"`, or just the address when no display name is set.
fn sender_mailbox(sender: &str, username: &str) -> Result<Mailbox, NotifyError> {
    let address = username
        .trim()
        .parse()
        .map_err(|err| NotifyError::Build(format!("invalid sender address {username}: {err}")))?;
    let name = Some(sender.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    Ok(Mailbox::new(name, address))
}
