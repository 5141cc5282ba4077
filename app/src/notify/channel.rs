use super::Notification;
use crate::config::{ChannelFlags, LogfileSettings, MailSettings, NtfySettings, StdoutSettings};
use crate::error::NotifyError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

const MAIL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Stdout,
    Logfile,
    Ntfy,
    Mail,
}

impl ChannelFlags {
    pub fn contains(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Stdout => self.stdout,
            ChannelKind::Logfile => self.logfile,
            ChannelKind::Ntfy => self.ntfy,
            ChannelKind::Mail => self.mail,
        }
    }

    pub fn intersect(&self, other: &ChannelFlags) -> ChannelFlags {
        ChannelFlags {
            stdout: self.stdout && other.stdout,
            logfile: self.logfile && other.logfile,
            ntfy: self.ntfy && other.ntfy,
            mail: self.mail && other.mail,
        }
    }
}

/// A destination operators get alerted on
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn deliver(&self, msg: &Notification) -> Result<(), NotifyError>;
}

/// Cuts `text` after `limit` characters
pub fn preview(text: &str, limit: Option<usize>) -> &str {
    match limit.and_then(|l| text.char_indices().nth(l)) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct StdoutChannel {
    subject_prefix: String,
    preview_chars: Option<usize>,
}

impl StdoutChannel {
    pub fn new(settings: &StdoutSettings, subject_prefix: &str) -> Self {
        StdoutChannel {
            subject_prefix: subject_prefix.to_owned(),
            preview_chars: settings.payload_preview_chars,
        }
    }
}

#[async_trait]
impl NotificationChannel for StdoutChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Stdout
    }

    async fn deliver(&self, msg: &Notification) -> Result<(), NotifyError> {
        let text = format!(
            "\n[{}] {}\nTitle: {}\nPayload:\n{}\n\n",
            msg.sent_at.format("%Y-%m-%d %H:%M:%S"),
            self.subject_prefix,
            msg.title,
            preview(&msg.short_body, self.preview_chars)
        );
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}

pub struct LogfileChannel {
    path: PathBuf,
    preview_chars: Option<usize>,
}

impl LogfileChannel {
    pub fn new(settings: &LogfileSettings) -> Self {
        LogfileChannel {
            path: PathBuf::from(&settings.path),
            preview_chars: settings.payload_preview_chars,
        }
    }
}

#[async_trait]
impl NotificationChannel for LogfileChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Logfile
    }

    async fn deliver(&self, msg: &Notification) -> Result<(), NotifyError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let line = format!(
            "{} - INFO - {} | {}\n",
            msg.sent_at.format("%Y-%m-%d %H:%M:%S"),
            msg.title,
            preview(&msg.full_body, self.preview_chars)
        );
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Push notifications through an ntfy server
pub struct NtfyChannel {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    priority: u8,
    subject_prefix: String,
    preview_chars: Option<usize>,
}

impl NtfyChannel {
    pub fn new(settings: &NtfySettings, subject_prefix: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(NtfyChannel {
            client,
            url: format!(
                "{}/{}",
                settings.server.trim_end_matches('/'),
                settings.topic
            ),
            token: settings.token.clone().filter(|t| !t.is_empty()),
            priority: settings.priority,
            subject_prefix: subject_prefix.to_owned(),
            preview_chars: settings.payload_preview_chars,
        })
    }
}

#[async_trait]
impl NotificationChannel for NtfyChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Ntfy
    }

    async fn deliver(&self, msg: &Notification) -> Result<(), NotifyError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Title", format!("{} {}", self.subject_prefix, msg.title))
            .header("Priority", self.priority.to_string())
            .body(preview(&msg.short_body, self.preview_chars).to_owned());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

/// Hands mails to the local `mail` command
pub struct MailChannel {
    sender: Option<String>,
    recipient: String,
    subject_prefix: String,
    preview_chars: Option<usize>,
}

impl MailChannel {
    pub fn new(settings: &MailSettings, subject_prefix: &str) -> Self {
        MailChannel {
            sender: settings.sender.clone().filter(|s| !s.is_empty()),
            recipient: settings.recipient.clone(),
            subject_prefix: subject_prefix.to_owned(),
            preview_chars: settings.payload_preview_chars,
        }
    }

    fn args(&self, title: &str) -> Vec<String> {
        let mut args = vec!["-s".to_owned(), format!("{} {}", self.subject_prefix, title)];
        if let Some(sender) = &self.sender {
            args.push("-r".to_owned());
            args.push(sender.clone());
        }
        args.push(self.recipient.clone());
        args
    }
}

#[async_trait]
impl NotificationChannel for MailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Mail
    }

    async fn deliver(&self, msg: &Notification) -> Result<(), NotifyError> {
        let body = format!(
            "{}\n\n---\nSent at: {}\n",
            preview(&msg.full_body, self.preview_chars),
            msg.sent_at.format("%Y-%m-%d %H:%M:%S %Z")
        );

        let mut command = Command::new("mail");
        command.args(self.args(&msg.title));
        run_piped(command, body.as_bytes(), MAIL_TIMEOUT).await
    }
}

/// Runs `command` with `input` on stdin, the child is killed once `limit` passes
async fn run_piped(mut command: Command, input: &[u8], limit: Duration) -> Result<(), NotifyError> {
    let child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = tokio::time::timeout(limit, feed_and_wait(child, input))
        .await
        .map_err(|_| NotifyError::Mail(format!("timed out after {:?}", limit)))??;
    if !output.status.success() {
        return Err(NotifyError::Mail(format!(
            "{}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

async fn feed_and_wait(mut child: Child, input: &[u8]) -> std::io::Result<Output> {
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input).await?;
    }
    child.wait_with_output().await
}
