use super::channel::{ChannelKind, LogfileChannel, NotificationChannel};
use super::*;
use crate::config::{LogfileSettings, TriggerSettings};
use crate::error::NotifyError;
use async_trait::async_trait;
use std::sync::Arc;

pub(crate) type Outbox = Arc<Mutex<Vec<Notification>>>;

pub(crate) struct RecordingChannel {
    kind: ChannelKind,
    outbox: Outbox,
    fail: bool,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn deliver(&self, msg: &Notification) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Mail("exit status: 1".to_owned()));
        }
        self.outbox.lock().push(msg.clone());
        Ok(())
    }
}

pub(crate) fn recording(kind: ChannelKind) -> (Box<dyn NotificationChannel>, Outbox) {
    let outbox = Outbox::default();
    let channel = RecordingChannel {
        kind,
        outbox: outbox.clone(),
        fail: false,
    };
    (Box::new(channel), outbox)
}

pub(crate) fn all_channels() -> ChannelFlags {
    ChannelFlags {
        stdout: true,
        logfile: true,
        ntfy: true,
        mail: true,
    }
}

/// Every channel and trigger switched on, 6h repeat
pub(crate) fn notify_settings() -> NotifySettings {
    let mut settings = NotifySettings::default();
    settings.stdout.enabled = true;
    settings.logfile.enabled = true;
    settings.ntfy.enabled = true;
    settings.mail.enabled = true;
    for kind in [
        TriggerKind::Info,
        TriggerKind::MissingData,
        TriggerKind::DbSize,
        TriggerKind::BadValues,
        TriggerKind::Exceptions,
    ] {
        let mut trigger = TriggerSettings::enabled_on(all_channels());
        trigger.repeat_every_hours = Some(6.0);
        *settings.trigger_mut(kind) = trigger;
    }
    settings
}

fn start() -> DateTime<Utc> {
    "2025-01-01T00:00:00Z".parse().unwrap()
}

#[tokio::test]
async fn test_throttle_per_key() {
    // prepare
    let (channel, outbox) = recording(ChannelKind::Stdout);
    let (dispatcher, worker) =
        NotificationDispatcher::with_channels(&notify_settings(), vec![channel]);
    let t0 = start();

    // execute
    let first = dispatcher.send_at(t0, "missing:a", TriggerKind::MissingData, "t", "b", None);
    let repeated = dispatcher.send_at(
        t0 + chrono::Duration::minutes(45),
        "missing:a",
        TriggerKind::MissingData,
        "t",
        "b",
        None,
    );
    let other_key = dispatcher.send_at(t0, "missing:b", TriggerKind::MissingData, "t", "b", None);
    let later = dispatcher.send_at(
        t0 + chrono::Duration::hours(6),
        "missing:a",
        TriggerKind::MissingData,
        "t",
        "b",
        None,
    );
    dispatcher.close();
    worker.run().await;

    // validate
    assert!(first);
    assert!(!repeated);
    assert!(other_key);
    assert!(later);
    assert_eq!(3, outbox.lock().len());
}

#[tokio::test]
async fn test_max_repeat_overrides_repeat() {
    let mut settings = notify_settings();
    settings.trigger_alarm_on_exceptions.max_repeat_every_hours = Some(1.0);
    let (dispatcher, _worker) = NotificationDispatcher::with_channels(&settings, vec![]);
    let t0 = start();

    assert!(dispatcher.send_at(t0, "k", TriggerKind::Exceptions, "t", "b", None));
    assert!(!dispatcher.send_at(
        t0 + chrono::Duration::minutes(59),
        "k",
        TriggerKind::Exceptions,
        "t",
        "b",
        None
    ));
    assert!(dispatcher.send_at(
        t0 + chrono::Duration::minutes(60),
        "k",
        TriggerKind::Exceptions,
        "t",
        "b",
        None
    ));
}

#[tokio::test]
async fn test_disabled_trigger() {
    // prepare
    let mut settings = notify_settings();
    settings.trigger_info.enabled = false;
    let (channel, outbox) = recording(ChannelKind::Stdout);
    let (dispatcher, worker) = NotificationDispatcher::with_channels(&settings, vec![channel]);

    // execute
    let sent = dispatcher.send("startup", TriggerKind::Info, "t", "b", None);
    dispatcher.close();
    worker.run().await;

    // validate
    assert!(!sent);
    assert!(outbox.lock().is_empty());
    assert!(dispatcher.last_sent_info().is_empty());
}

#[tokio::test]
async fn test_channel_selection() {
    // prepare
    let mut settings = notify_settings();
    settings.ntfy.enabled = false;
    settings.trigger_alarm_on_db_size.channels.stdout = false;
    let (stdout, stdout_box) = recording(ChannelKind::Stdout);
    let (ntfy, ntfy_box) = recording(ChannelKind::Ntfy);
    let (mail, mail_box) = recording(ChannelKind::Mail);
    let (dispatcher, worker) =
        NotificationDispatcher::with_channels(&settings, vec![stdout, ntfy, mail]);

    // execute
    dispatcher.send(
        "db_size:warn",
        TriggerKind::DbSize,
        "Database size",
        "short",
        Some("the full story"),
    );
    dispatcher.close();
    worker.run().await;

    // validate
    assert!(stdout_box.lock().is_empty());
    assert!(ntfy_box.lock().is_empty());
    let mails = mail_box.lock();
    assert_eq!(1, mails.len());
    assert_eq!("short", mails[0].short_body);
    assert_eq!("the full story", mails[0].full_body);
}

#[tokio::test]
async fn test_failing_channel_keeps_throttle() {
    // prepare
    let outbox = Outbox::default();
    let failing = Box::new(RecordingChannel {
        kind: ChannelKind::Mail,
        outbox: Outbox::default(),
        fail: true,
    });
    let working = Box::new(RecordingChannel {
        kind: ChannelKind::Stdout,
        outbox: outbox.clone(),
        fail: false,
    });
    let (dispatcher, worker) =
        NotificationDispatcher::with_channels(&notify_settings(), vec![failing, working]);

    // execute
    let first = dispatcher.send("startup", TriggerKind::Info, "t", "b", None);
    let again = dispatcher.send("startup", TriggerKind::Info, "t", "b", None);
    dispatcher.close();
    worker.run().await;

    // validate
    assert!(first);
    assert!(!again);
    assert_eq!(1, outbox.lock().len());
    assert!(dispatcher.last_sent_info().contains_key("startup"));
}

#[tokio::test]
async fn test_send_after_close() {
    let (dispatcher, worker) = NotificationDispatcher::with_channels(&notify_settings(), vec![]);
    dispatcher.close();
    worker.run().await;

    assert!(dispatcher.send("startup", TriggerKind::Info, "t", "b", None));
}

#[tokio::test]
async fn test_last_sent_info_timezone() {
    let mut settings = notify_settings();
    settings.timezone = "Europe/Berlin".to_owned();
    let (dispatcher, _worker) = NotificationDispatcher::with_channels(&settings, vec![]);

    dispatcher.send_at(start(), "startup", TriggerKind::Info, "t", "b", None);

    assert_eq!(
        Some(&"2025-01-01 01:00:00".to_owned()),
        dispatcher.last_sent_info().get("startup")
    );
}

#[tokio::test]
async fn test_logfile_channel() {
    // prepare
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log").join("alerts.log");
    let settings = LogfileSettings {
        enabled: true,
        path: path.display().to_string(),
        payload_preview_chars: Some(8),
    };
    let channel = LogfileChannel::new(&settings);
    let (dispatcher, worker) =
        NotificationDispatcher::with_channels(&notify_settings(), vec![Box::new(channel)]);

    // execute
    dispatcher.send_at(
        start(),
        "startup",
        TriggerKind::Info,
        "Logger started",
        "short",
        Some("full body text"),
    );
    dispatcher.send_at(start(), "schema:cellar", TriggerKind::Info, "Cellar", "x", None);
    dispatcher.close();
    worker.run().await;

    // validate
    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(2, lines.len());
    assert_eq!("2025-01-01 00:00:00 - INFO - Logger started | full bod", lines[0]);
    assert!(lines[1].ends_with("Cellar | x"));
}
