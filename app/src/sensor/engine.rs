use super::container::SensorContainer;
use super::router::MessageRouter;
use super::SensorMessage;
use crate::config::{SystemConfig, TriggerKind};
use crate::error::{IngestError, StartupError};
use crate::models::record::PersistenceGateway;
use crate::models::schema::{self, ActiveTableSet};
use crate::notify::NotificationDispatcher;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use sensorlog_core::{Record, StoredValue};
use serde_json::Value;
use sqlx::SqlitePool;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const PAYLOAD_PREVIEW_CHARS: usize = 500;

/// Routes, sanitizes and stores sensor messages and watches over the sensors
pub struct IngestionEngine {
    config: Arc<SystemConfig>,
    tables: ActiveTableSet,
    router: MessageRouter,
    gateway: PersistenceGateway,
    dispatcher: Arc<NotificationDispatcher>,
    container: SensorContainer,
    started_at: DateTime<Utc>,
    last_db_check: Mutex<Option<DateTime<Utc>>>,
}

impl IngestionEngine {
    pub async fn start(
        config: Arc<SystemConfig>,
        pool: SqlitePool,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Result<Arc<Self>, StartupError> {
        Self::start_at(config, pool, dispatcher, Utc::now()).await
    }

    /// Validates the schema and sends the startup report
    ///
    /// Fails if the schema can't be read or no table is usable. Tables
    /// failing validation are reported one by one and stay inactive.
    pub async fn start_at(
        config: Arc<SystemConfig>,
        pool: SqlitePool,
        dispatcher: Arc<NotificationDispatcher>,
        now: DateTime<Utc>,
    ) -> Result<Arc<Self>, StartupError> {
        let tables = schema::validate(&pool, &config.tables)
            .await
            .map_err(StartupError::Schema)?;

        for inactive in tables.inactive() {
            dispatcher.send_at(
                now,
                &format!("schema:{}", inactive.key),
                TriggerKind::Info,
                &format!("Table {} deactivated", inactive.key),
                &inactive.reason,
                None,
            );
        }

        if tables.is_empty() {
            error!("No configured table matches the database schema");
            dispatcher.send_at(
                now,
                "startup",
                TriggerKind::Exceptions,
                "Logger not started",
                &format!(
                    "No configured table matches the schema of {}, refusing to consume messages",
                    config.db_file
                ),
                None,
            );
            return Err(StartupError::NoActiveTable);
        }

        let gateway = PersistenceGateway::new(pool, &tables, &config.storage);
        let engine = IngestionEngine {
            router: MessageRouter::new(&config.mqtt.topic),
            tables,
            gateway,
            dispatcher,
            container: SensorContainer::new(),
            started_at: now,
            last_db_check: Mutex::new(None),
            config,
        };
        engine.send_startup_report(now);
        Ok(Arc::new(engine))
    }

    pub fn tables(&self) -> &ActiveTableSet {
        &self.tables
    }

    pub fn container(&self) -> &SensorContainer {
        &self.container
    }

    /// Consumes messages in arrival order until every sender is gone
    pub async fn dispatch_ingest_loop(
        self: Arc<IngestionEngine>,
        mut receiver: UnboundedReceiver<SensorMessage>,
    ) {
        info!("Start consuming sensor messages");
        while let Some(msg) = receiver.recv().await {
            let span = info_span!(parent: &msg.span, "message", topic = %msg.topic);
            self.on_message(msg.topic, msg.payload, Utc::now())
                .instrument(span)
                .await;
        }
        info!("Sensor message stream closed");
    }

    /// Runs the sweep on its interval until shutdown is signalled
    pub async fn dispatch_sweep_loop(
        self: Arc<IngestionEngine>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period =
            std::time::Duration::from_secs(self.config.engine.sweep_interval_seconds.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep(Utc::now()).await,
                _ = shutdown.changed() => break,
            }
        }
        debug!("Sweep loop stopped");
    }

    /// Handles one message, faults are contained and reported
    pub async fn on_message(self: &Arc<Self>, topic: String, payload: Vec<u8>, now: DateTime<Utc>) {
        let engine = self.clone();
        let task_topic = topic.clone();
        let task_payload = payload.clone();
        let result = tokio::spawn(
            async move { engine.ingest(&task_topic, &task_payload, now).await }.in_current_span(),
        )
        .await
        .unwrap_or_else(|e| Err(IngestError::Internal(e.to_string())));

        if let Err(e) = result {
            self.report_fault(&topic, &payload, &e, now);
        }
    }

    async fn ingest(&self, topic: &str, payload: &[u8], now: DateTime<Utc>) -> Result<(), IngestError> {
        let table = self
            .router
            .resolve(topic, &self.tables)
            .ok_or_else(|| IngestError::UnknownRoute(topic.to_owned()))?;
        let routing_key = table.routing_key.as_str();

        let text = std::str::from_utf8(payload).map_err(|e| IngestError::Decode(e.to_string()))?;
        let object = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => object,
            Ok(other) => return Err(IngestError::Shape(json_type(&other))),
            Err(e) => return Err(IngestError::Decode(e.to_string())),
        };

        let timestamp = object
            .get(&table.timestamp.name)
            .filter(|ts| !is_blank(ts))
            .ok_or_else(|| IngestError::MissingTimestamp(table.timestamp.name.clone()))?;

        let mut record = Record::new(StoredValue::from_json(timestamp));
        let mut bad_hits = Vec::new();
        for field in table.fields.iter() {
            let sanitized = field.sanitize(object.get(&field.key));
            if !sanitized.is_good() {
                bad_hits.push((field.key.clone(), sanitized.verdict));
            }
            let levels = field.check_levels(&sanitized.value);
            if levels.limits {
                warn!(
                    sensor_id = routing_key,
                    field = %field.key,
                    "Value {} outside of plausible limits",
                    sanitized.value
                );
            } else if levels.alarm {
                debug!(sensor_id = routing_key, field = %field.key, "Value {} in alarm band", sanitized.value);
            }
            record.push(&field.key, sanitized.value);
        }

        self.gateway.insert(&table.key, &record).await?;
        self.container.record_message(routing_key, now);
        self.container.add_bad(routing_key, &bad_hits);

        if self.config.mqtt.compact_log_enabled {
            info!(
                sensor_id = routing_key,
                "{} stored {}",
                table.key,
                compact_line(&record)
            );
        } else {
            debug!(sensor_id = routing_key, table = %table.key, "Stored record {:?}", record);
        }
        Ok(())
    }

    fn report_fault(&self, topic: &str, payload: &[u8], err: &IngestError, now: DateTime<Utc>) {
        let exceptions = self.dispatcher.settings().trigger(TriggerKind::Exceptions);
        let raise = match err {
            IngestError::UnknownRoute(_) => exceptions.raise_on_unknown_sensor_error,
            IngestError::Shape(_) => exceptions.raise_on_non_dict_payload,
            IngestError::MissingTimestamp(_) => exceptions.raise_on_missing_timestamp,
            IngestError::Decode(_) => exceptions.raise_on_json_decode_error,
            IngestError::Storage(_) | IngestError::Internal(_) => true,
        };

        match err {
            IngestError::Storage(_) | IngestError::Internal(_) => {
                error!(topic, "{}: {}", err.kind(), err)
            }
            _ => warn!(topic, "{}: {}", err.kind(), err),
        }
        if !raise {
            return;
        }

        let scope = self.router.routing_key(topic).unwrap_or(topic);
        let preview: String = String::from_utf8_lossy(payload)
            .chars()
            .take(PAYLOAD_PREVIEW_CHARS)
            .collect();
        let full_body = format!("{}\n\nTopic: {}\nPayload: {}", err, topic, preview);
        self.dispatcher.send_at(
            now,
            &format!("exception:{}:{}", err.kind(), scope),
            TriggerKind::Exceptions,
            &format!("{} for {}", err.kind(), scope),
            &err.to_string(),
            Some(&full_body),
        );
    }

    pub async fn sweep(&self, now: DateTime<Utc>) {
        self.check_missing_data(now);
        self.check_bad_values(now);
        self.check_db_size(now).await;
        self.check_heartbeat(now);
    }

    fn check_missing_data(&self, now: DateTime<Utc>) {
        let window = self
            .config
            .notify
            .trigger(TriggerKind::MissingData)
            .window();
        for table in self.tables.active() {
            let seen = self.container.last_message(&table.routing_key);
            let last = seen.unwrap_or(self.started_at);
            let silence = now - last;
            if silence <= window {
                continue;
            }

            let since = match seen {
                Some(at) => format!("last message at {}", self.local_time(at)),
                None => format!("no message since start at {}", self.local_time(last)),
            };
            let body = format!(
                "No data from {} ({}) for {}, {}",
                table.alias,
                table.routing_key,
                format_duration(silence),
                since
            );
            if self.dispatcher.send_at(
                now,
                &format!("missing:{}", table.routing_key),
                TriggerKind::MissingData,
                &format!("Missing data from {}", table.alias),
                &body,
                None,
            ) {
                warn!(sensor_id = %table.routing_key, "{}", body);
            }
        }
    }

    fn check_bad_values(&self, now: DateTime<Utc>) {
        let min_count = self
            .config
            .notify
            .trigger(TriggerKind::BadValues)
            .min_count();
        for (routing_key, tally) in self.container.bad_tallies() {
            if tally.count == 0 || tally.count < min_count {
                continue;
            }
            let alias = self
                .tables
                .by_routing_key(&routing_key)
                .map_or(routing_key.as_str(), |t| t.alias.as_str());

            let short_body = format!("{} bad values from {}", tally.count, alias);
            let mut full_body = format!("{} ({}):\n", short_body, routing_key);
            for (field, counts) in tally.fields.iter() {
                let _ = writeln!(
                    full_body,
                    "  {}: {} sentinel, {} unparseable",
                    field, counts.replaced, counts.unparseable
                );
            }

            if self.dispatcher.send_at(
                now,
                &format!("bad_values:{}", routing_key),
                TriggerKind::BadValues,
                &format!("Bad values from {}", alias),
                &short_body,
                Some(&full_body),
            ) {
                self.container.reset_bad(&routing_key);
            }
        }
    }

    async fn check_db_size(&self, now: DateTime<Utc>) {
        let trigger = self.config.notify.trigger(TriggerKind::DbSize);
        {
            let mut last_check = self.last_db_check.lock();
            if let Some(last) = *last_check {
                if now - last < trigger.check_every() {
                    return;
                }
            }
            *last_check = Some(now);
        }

        let size_mb = match tokio::fs::metadata(&self.config.db_file).await {
            Ok(meta) => meta.len() as f64 / BYTES_PER_MB,
            Err(e) => {
                warn!("Couldn't read size of {}: {}", self.config.db_file, e);
                return;
            }
        };
        debug!("Database size {:.1} MB", size_mb);

        let (key, title, limit) = match (trigger.warn_mb, trigger.crit_mb) {
            (_, Some(crit_mb)) if size_mb > crit_mb => {
                ("db_size:critical", "Database size critical", crit_mb)
            }
            (Some(warn_mb), _) if size_mb > warn_mb => {
                ("db_size:warn", "Database size warning", warn_mb)
            }
            _ => return,
        };
        let body = format!(
            "{} has {:.1} MB, limit is {:.1} MB",
            self.config.db_file, size_mb, limit
        );
        self.dispatcher
            .send_at(now, key, TriggerKind::DbSize, title, &body, None);
    }

    fn check_heartbeat(&self, now: DateTime<Utc>) {
        let info = self.config.notify.trigger(TriggerKind::Info);
        let uptime = now - self.started_at;
        if uptime < info.repeat_every() {
            return;
        }

        let mut body = format!("Running for {}\n", format_duration(uptime));
        for table in self.tables.active() {
            let state = match self.container.state(&table.routing_key) {
                Some(state) => state,
                None => {
                    let _ = writeln!(body, "{} ({}): no messages", table.alias, table.routing_key);
                    continue;
                }
            };
            let since_info = state.last_info_time.unwrap_or(self.started_at);
            let _ = writeln!(
                body,
                "{} ({}): {} messages, every {} since start, every {} since last report",
                table.alias,
                table.routing_key,
                state.total_count,
                average_interval(uptime, state.total_count),
                average_interval(
                    now - since_info,
                    state.total_count - state.last_info_count
                ),
            );
        }

        if self.dispatcher.send_at(
            now,
            "info:heartbeat",
            TriggerKind::Info,
            "Status report",
            &body,
            None,
        ) {
            self.container.mark_info(now);
        }
    }

    fn send_startup_report(&self, now: DateTime<Utc>) {
        let mqtt = &self.config.mqtt;
        let mut body = format!(
            "Started at {}\nBroker: {}:{} ({})\nDatabase: {}\n",
            self.local_time(now),
            mqtt.host,
            mqtt.port,
            mqtt.topic,
            self.config.db_file
        );
        body.push_str("Active tables:\n");
        for table in self.tables.active() {
            let _ = writeln!(
                body,
                "  {} -> {} (sensor {})",
                table.key, table.storage_name, table.routing_key
            );
        }
        if !self.tables.inactive().is_empty() {
            body.push_str("Inactive tables:\n");
            for inactive in self.tables.inactive() {
                let _ = writeln!(body, "  {}: {}", inactive.key, inactive.reason);
            }
        }
        info!(
            active = self.tables.active().len(),
            inactive = self.tables.inactive().len(),
            "Logger started"
        );
        self.dispatcher
            .send_at(now, "startup", TriggerKind::Info, "Logger started", &body, None);
    }

    pub async fn shutdown(&self) {
        self.gateway.pool().close().await;
        info!("Closed database pool");
    }

    fn local_time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.dispatcher.tz())
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn compact_line(record: &Record) -> String {
    let mut line = record.timestamp.to_string();
    for (key, value) in record.values.iter() {
        let _ = write!(line, " {}={}", key, value);
    }
    line
}

fn format_duration(duration: Duration) -> String {
    let minutes = duration.num_minutes();
    if minutes < 120 {
        format!("{} min", minutes)
    } else {
        format!("{:.1} h", minutes as f64 / 60.0)
    }
}

fn average_interval(span: Duration, count: u64) -> String {
    if count == 0 {
        return "n/a".to_owned();
    }
    let seconds = span.num_seconds() as f64 / count as f64;
    if seconds < 120.0 {
        format!("{:.0} s", seconds)
    } else {
        format!("{:.1} min", seconds / 60.0)
    }
}
