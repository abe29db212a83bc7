//! Batch requests: one host, an ordered list of targets, and the callbacks
//! the pipeline reports into.

use crate::error::DownloadError;
use chatlog_core::{Log, LogIdentifier, LogService, TimePeriod};

/// One log to fetch: its identifier and the request path that serves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: LogIdentifier,
    pub path: String,
}

/// Whose logs a query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserSelection {
    Users(Vec<String>),
    /// Every user: whole-channel logs, one per day.
    All,
}

/// Targets for `channels` × `users` over `period`.
///
/// Listed users get one target per (channel, user, month); `All` gets one
/// per (channel, day).
pub fn targets_for(
    service: LogService,
    channels: &[String],
    users: &UserSelection,
    period: &TimePeriod,
) -> Vec<Target> {
    let mut targets = Vec::new();
    for channel in channels {
        match users {
            UserSelection::Users(users) => {
                for user in users {
                    for ym in period.year_months() {
                        let (id, path) = service.user_target(channel, user, ym);
                        targets.push(Target { id, path });
                    }
                }
            }
            UserSelection::All => {
                for date in period.dates() {
                    let (id, path) = service.channel_target(channel, date);
                    targets.push(Target { id, path });
                }
            }
        }
    }
    targets
}

/// How many targets [`targets_for`] would build, computed without building them.
pub fn target_count(channels: &[String], users: &UserSelection, period: &TimePeriod) -> usize {
    let per_channel = match users {
        UserSelection::Users(users) => users.len().saturating_mul(period.month_count()),
        UserSelection::All => period.day_count(),
    };
    channels.len().saturating_mul(per_channel)
}

pub type LogCallback = Box<dyn FnMut(Log) + Send>;
pub type ErrorCallback = Box<dyn FnOnce(&DownloadError) + Send>;

/// Everything one pipeline run needs.
pub struct LogRequest {
    pub host: String,
    pub port: u16,
    pub service: LogService,
    targets: Vec<Target>,
    on_log: LogCallback,
    on_error: Option<ErrorCallback>,
}

impl LogRequest {
    pub fn new(service: LogService, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            service,
            targets: Vec::new(),
            on_log: Box::new(|_| {}),
            on_error: None,
        }
    }

    pub fn target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    pub fn targets_from(mut self, targets: impl IntoIterator<Item = Target>) -> Self {
        self.targets.extend(targets);
        self
    }

    /// One target per month of `period` for `user` in `channel`.
    pub fn user_logs(self, channel: &str, user: &str, period: &TimePeriod) -> Self {
        let targets = targets_for(
            self.service,
            &[channel.to_string()],
            &UserSelection::Users(vec![user.to_string()]),
            period,
        );
        self.targets_from(targets)
    }

    /// One target per day of `period` for all of `channel`.
    pub fn channel_logs(self, channel: &str, period: &TimePeriod) -> Self {
        let targets = targets_for(self.service, &[channel.to_string()], &UserSelection::All, period);
        self.targets_from(targets)
    }

    /// Called once per target, in target order.
    pub fn on_log(mut self, f: impl FnMut(Log) + Send + 'static) -> Self {
        self.on_log = Box::new(f);
        self
    }

    /// Called at most once, when the batch fails.
    pub fn on_error(mut self, f: impl FnOnce(&DownloadError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub(crate) fn deliver(&mut self, log: Log) {
        (self.on_log)(log);
    }

    pub(crate) fn fail(&mut self, err: &DownloadError) {
        if let Some(f) = self.on_error.take() {
            f(err);
        }
    }
}

impl std::fmt::Debug for LogRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("service", &self.service)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
