//! The `count` and `find` commands, built on the aggregator.
//!
//! ```text
//! Query ──► targets_for ──┬─ in store ─────────────────────► fold part ──┐
//!                         └─ missing ──► Downloader ──► log ─► fold part ─┼─► FanIn ──► Answer
//!                                                         └─► store.put   │
//!                                              transport error ───────────┘ (fail)
//! ```
//!
//! Only logs whose period has ended are read from or written to the store;
//! the current day or month is always fetched.

use crate::aggregate::{render_transcript, CountGather, FanIn, FindGather, Gather, Outcome};
use crate::downloader::{Downloader, Handshake};
use crate::paste::{PasteError, PasteUpload};
use crate::request::{target_count, targets_for, LogRequest, Target, UserSelection};
use chatlog_core::config::{Config, ServiceConfig};
use chatlog_core::{Line, Log, LogIdentifier, LogService, LogStore, Matcher, TimePeriod, TimePoint};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinError;

/// Queries expanding to more logs than this are refused.
pub const MAX_TARGETS: usize = 10_000;

/// A count or find request.
#[derive(Debug, Clone)]
pub struct Query {
    pub matcher: Matcher,
    pub channels: Vec<String>,
    pub users: UserSelection,
    pub period: TimePeriod,
    pub service: LogService,
}

impl Query {
    /// A query over the current calendar month on the default service.
    pub fn new(matcher: Matcher, channels: Vec<String>, users: UserSelection) -> Self {
        Self {
            matcher,
            channels,
            users,
            period: TimePeriod::current_month(Utc::now()),
            service: LogService::default(),
        }
    }

    pub fn period(mut self, period: TimePeriod) -> Self {
        self.period = period;
        self
    }

    pub fn service(mut self, service: LogService) -> Self {
        self.service = service;
        self
    }

    fn targets(&self) -> Result<Vec<Target>, String> {
        let count = target_count(&self.channels, &self.users, &self.period);
        if count > MAX_TARGETS {
            return Err(format!("query spans {count} logs, at most {MAX_TARGETS} allowed"));
        }
        Ok(targets_for(self.service, &self.channels, &self.users, &self.period))
    }
}

/// The single reply to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Count(usize),
    /// Where the transcript of matching lines was pasted.
    Found(String),
    NoMatch,
    Failed(String),
}

impl std::fmt::Display for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Answer::Count(n) => write!(f, "{n}"),
            Answer::Found(location) => write!(f, "{location}"),
            Answer::NoMatch => write!(f, "no match"),
            Answer::Failed(reason) => write!(f, "error: {reason}"),
        }
    }
}

pub type SharedStore = Arc<Mutex<LogStore>>;

/// Command runner: endpoints per service, a downloader, an optional store
/// and the paste collaborator.
pub struct Commands<H> {
    downloader: Downloader<H>,
    endpoints: HashMap<LogService, ServiceConfig>,
    store: Option<SharedStore>,
    paste: Arc<dyn PasteUpload>,
}

impl<H: Handshake + Clone + 'static> Commands<H> {
    pub fn new(downloader: Downloader<H>, paste: Arc<dyn PasteUpload>) -> Self {
        Self {
            downloader,
            endpoints: HashMap::new(),
            store: None,
            paste,
        }
    }

    /// Endpoints for every service from `config`.
    pub fn with_config(mut self, config: &Config) -> Self {
        for service in [LogService::Gempir, LogService::Overrustle] {
            self.endpoints.insert(service, config.service(service).clone());
        }
        self
    }

    pub fn endpoint(mut self, service: LogService, host: impl Into<String>, port: u16) -> Self {
        self.endpoints.insert(
            service,
            ServiceConfig {
                host: host.into(),
                port,
            },
        );
        self
    }

    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Count matches in the messages of every line inside the period.
    pub async fn count(&self, query: Query, reply: impl FnOnce(Answer) + Send + 'static) {
        let matcher = query.matcher.clone();
        let period = query.period;
        let part = move |log: &Log| -> usize {
            log.lines()
                .iter()
                .filter(|line| period.is_inside(line.time))
                .map(|line| matcher.count(log.message(line)))
                .sum()
        };
        let targets = match query.targets() {
            Ok(targets) => targets,
            Err(reason) => return reply(Answer::Failed(reason)),
        };
        let fan = FanIn::new(targets.len(), CountGather::default(), move |outcome| {
            reply(match outcome {
                Outcome::Done(n) => Answer::Count(n),
                Outcome::Failed(reason) => Answer::Failed(reason),
            })
        });
        self.scatter(query.service, targets, fan, part).await;
    }

    /// Copy every line inside the period whose message matches, paste the
    /// time-sorted transcript and answer with its location.
    pub async fn find(&self, query: Query, reply: impl FnOnce(Answer) + Send + 'static) {
        let matcher = query.matcher.clone();
        let period = query.period;
        let part = move |log: &Log| -> Vec<Line> {
            log.lines()
                .iter()
                .filter(|line| period.is_inside(line.time) && matcher.is_match(log.message(line)))
                .map(|line| log.to_line(line))
                .collect()
        };
        let targets = match query.targets() {
            Ok(targets) => targets,
            Err(reason) => return reply(Answer::Failed(reason)),
        };
        let paste = Arc::clone(&self.paste);
        let fan = FanIn::new(targets.len(), FindGather::default(), move |outcome| {
            match outcome {
                Outcome::Done(lines) if lines.is_empty() => reply(Answer::NoMatch),
                Outcome::Done(lines) => {
                    let transcript = render_transcript(&lines);
                    paste.upload(
                        transcript.into_bytes(),
                        Box::new(move |result: Result<String, PasteError>| {
                            reply(match result {
                                Ok(location) => Answer::Found(location),
                                Err(e) => Answer::Failed(e.to_string()),
                            })
                        }),
                    );
                }
                Outcome::Failed(reason) => reply(Answer::Failed(reason)),
            }
        });
        self.scatter(query.service, targets, fan, part).await;
    }

    /// [`count`](Self::count), awaiting the answer.
    pub async fn count_answer(&self, query: Query) -> Answer {
        let (tx, rx) = oneshot::channel();
        self.count(query, move |answer| {
            let _ = tx.send(answer);
        })
        .await;
        rx.await
            .unwrap_or_else(|_| Answer::Failed("command dropped its reply".into()))
    }

    /// [`find`](Self::find), awaiting the answer.
    pub async fn find_answer(&self, query: Query) -> Answer {
        let (tx, rx) = oneshot::channel();
        self.find(query, move |answer| {
            let _ = tx.send(answer);
        })
        .await;
        rx.await
            .unwrap_or_else(|_| Answer::Failed("command dropped its reply".into()))
    }

    /// Fold stored logs straight away, download the rest in one batch and
    /// store the settled downloads once the batch ends.
    async fn scatter<G, F>(
        &self,
        service: LogService,
        targets: Vec<Target>,
        fan: Arc<FanIn<G>>,
        part: F,
    ) where
        G: Gather,
        F: Fn(&Log) -> G::Part + Send + Sync + 'static,
    {
        let now = Utc::now();
        let (stored, missing) = match self.lookup(targets, now).await {
            Ok(split) => split,
            Err(e) => {
                fan.fail(format!("store lookup failed: {e}"));
                return;
            }
        };
        for log in stored {
            fan.complete(part(&log));
        }
        if missing.is_empty() {
            return;
        }

        let Some(endpoint) = self.endpoints.get(&service) else {
            fan.fail(format!("no endpoint configured for {service}"));
            return;
        };

        let keep = self.store.is_some();
        let fresh: Arc<Mutex<Vec<Log>>> = Arc::default();
        let on_log = {
            let fan = Arc::clone(&fan);
            let fresh = Arc::clone(&fresh);
            move |log: Log| {
                let folded = part(&log);
                if keep && log.is_valid() && is_settled(log.id(), now) {
                    fresh.lock().unwrap_or_else(PoisonError::into_inner).push(log);
                }
                fan.complete(folded);
            }
        };
        let request = LogRequest::new(service, endpoint.host.clone(), endpoint.port)
            .targets_from(missing)
            .on_log(on_log)
            .on_error(move |err| {
                fan.fail(err.to_string());
            });

        if let Err(e) = self.downloader.run(request).await {
            tracing::debug!(error = %e, "batch ended early");
        }

        let logs = std::mem::take(&mut *fresh.lock().unwrap_or_else(PoisonError::into_inner));
        self.save(logs).await;
    }

    /// Split `targets` into logs already in the store and targets to fetch.
    async fn lookup(
        &self,
        targets: Vec<Target>,
        now: TimePoint,
    ) -> Result<(Vec<Arc<Log>>, Vec<Target>), JoinError> {
        let Some(store) = self.store.clone() else {
            return Ok((Vec::new(), targets));
        };
        tokio::task::spawn_blocking(move || {
            let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
            let mut stored = Vec::new();
            let mut missing = Vec::new();
            for target in targets {
                if !is_settled(&target.id, now) {
                    missing.push(target);
                    continue;
                }
                match store.load(&target.id) {
                    Ok(Some(log)) => {
                        tracing::debug!(id = %target.id, "log served from store");
                        stored.push(log);
                    }
                    Ok(None) => missing.push(target),
                    Err(e) => {
                        tracing::warn!(id = %target.id, error = %e, "stored log unusable, refetching");
                        missing.push(target);
                    }
                }
            }
            (stored, missing)
        })
        .await
    }

    async fn save(&self, logs: Vec<Log>) {
        let Some(store) = self.store.clone() else {
            return;
        };
        if logs.is_empty() {
            return;
        }
        let saved = tokio::task::spawn_blocking(move || {
            store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .put_all(logs)
        })
        .await;
        match saved {
            Ok(Ok(count)) => tracing::debug!(count, "downloaded logs stored"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to store downloaded logs"),
            Err(e) => tracing::warn!(error = %e, "store task failed"),
        }
    }
}

/// A log may be kept once nothing more can be appended to it.
fn is_settled(id: &LogIdentifier, now: TimePoint) -> bool {
    id.period.end() <= now
}
