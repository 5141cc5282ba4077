use crate::config::{ChannelFlags, NotifySettings, TriggerKind};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

pub mod channel;

#[cfg(test)]
pub(crate) mod test;

use channel::{
    LogfileChannel, MailChannel, NotificationChannel, NtfyChannel, StdoutChannel,
};

/// One alert, as handed to the delivery worker
#[derive(Debug, Clone)]
pub struct Notification {
    pub key: String,
    pub trigger: TriggerKind,
    pub title: String,
    pub short_body: String,
    pub full_body: String,
    pub channels: ChannelFlags,
    pub sent_at: DateTime<Tz>,
}

/// Throttles alerts per trigger key and queues them for delivery
pub struct NotificationDispatcher {
    settings: NotifySettings,
    tz: Tz,
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
    sender: Mutex<Option<UnboundedSender<Notification>>>,
}

impl NotificationDispatcher {
    /// Creates the dispatcher with a channel for every globally enabled destination
    pub fn new(settings: &NotifySettings) -> (Self, DeliveryWorker) {
        let prefix = settings.subject_prefix.as_str();
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();
        if settings.stdout.enabled {
            channels.push(Box::new(StdoutChannel::new(&settings.stdout, prefix)));
        }
        if settings.logfile.enabled {
            channels.push(Box::new(LogfileChannel::new(&settings.logfile)));
        }
        if settings.ntfy.enabled {
            match NtfyChannel::new(&settings.ntfy, prefix) {
                Ok(ntfy) => channels.push(Box::new(ntfy)),
                Err(e) => error!("Couldn't set up ntfy channel: {}", e),
            }
        }
        if settings.mail.enabled {
            channels.push(Box::new(MailChannel::new(&settings.mail, prefix)));
        }
        Self::with_channels(settings, channels)
    }

    pub fn with_channels(
        settings: &NotifySettings,
        channels: Vec<Box<dyn NotificationChannel>>,
    ) -> (Self, DeliveryWorker) {
        let (sender, receiver) = unbounded_channel();
        let tz = settings.tz().unwrap_or(Tz::UTC);
        let dispatcher = NotificationDispatcher {
            settings: settings.clone(),
            tz,
            last_sent: Mutex::new(HashMap::new()),
            sender: Mutex::new(Some(sender)),
        };
        (dispatcher, DeliveryWorker { receiver, channels })
    }

    pub fn settings(&self) -> &NotifySettings {
        &self.settings
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn send(
        &self,
        key: &str,
        trigger: TriggerKind,
        title: &str,
        short_body: &str,
        full_body: Option<&str>,
    ) -> bool {
        self.send_at(Utc::now(), key, trigger, title, short_body, full_body)
    }

    /// Returns false if the trigger is disabled or `key` was sent too recently
    pub fn send_at(
        &self,
        now: DateTime<Utc>,
        key: &str,
        trigger: TriggerKind,
        title: &str,
        short_body: &str,
        full_body: Option<&str>,
    ) -> bool {
        let trigger_settings = self.settings.trigger(trigger);
        if !trigger_settings.enabled {
            debug!(key, "Trigger {:?} disabled, dropped notification", trigger);
            return false;
        }

        {
            let mut last_sent = self.last_sent.lock();
            if let Some(previous) = last_sent.get(key) {
                if now - *previous < trigger_settings.min_repeat() {
                    debug!(key, "Notification throttled");
                    return false;
                }
            }
            last_sent.insert(key.to_owned(), now);
        }

        let notification = Notification {
            key: key.to_owned(),
            trigger,
            title: title.to_owned(),
            short_body: short_body.to_owned(),
            full_body: full_body.unwrap_or(short_body).to_owned(),
            channels: self
                .settings
                .global_channels()
                .intersect(&trigger_settings.channels),
            sent_at: now.with_timezone(&self.tz),
        };
        match self.sender.lock().as_ref() {
            Some(sender) => {
                if let Err(e) = sender.send(notification) {
                    error!(key, "Failed queueing notification: {}", e);
                }
            }
            None => warn!(key, "Dispatcher closed, dropped notification"),
        }
        true
    }

    /// Last send time per throttle key, formatted in the configured timezone
    pub fn last_sent_info(&self) -> HashMap<String, String> {
        self.last_sent
            .lock()
            .iter()
            .map(|(key, at)| {
                (
                    key.clone(),
                    at.with_timezone(&self.tz)
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string(),
                )
            })
            .collect()
    }

    /// Stops accepting notifications, the worker ends once the queue is drained
    pub fn close(&self) {
        self.sender.lock().take();
    }
}

/// Delivers queued notifications to their channels one after another
pub struct DeliveryWorker {
    receiver: UnboundedReceiver<Notification>,
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl DeliveryWorker {
    pub async fn run(mut self) {
        while let Some(notification) = self.receiver.recv().await {
            self.deliver(&notification).await;
        }
        debug!("Notification queue closed");
    }

    async fn deliver(&self, notification: &Notification) {
        debug!(key = %notification.key, trigger = ?notification.trigger, "Delivering notification");
        for channel in self.channels.iter() {
            if !notification.channels.contains(channel.kind()) {
                continue;
            }
            if let Err(e) = channel.deliver(notification).await {
                error!(
                    key = %notification.key,
                    "Failed delivering to {:?}: {}",
                    channel.kind(),
                    e
                );
            }
        }
    }
}
