//! Command-line surface: argument types, query building and tracing setup.

use anyhow::Context;
use chatlog_core::time::{parse_time_period, TimePoint};
use chatlog_core::{LogService, Matcher, TimePeriod};
use chatlog_fetch::{Query, UserSelection};
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

const DEBUG_LOG: &str = "/tmp/chatlog-debug.log";

#[derive(Debug, Parser)]
#[command(name = "chatlog", about = "Count and find lines in historical chat logs")]
pub struct Cli {
    /// Write debug logs to /tmp/chatlog-debug.log (tail -f to inspect).
    #[arg(long)]
    pub debug: bool,

    /// Config file to use instead of ~/.config/chatlog/config.toml.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Count occurrences of a pattern.
    Count(QueryArgs),
    /// Paste every line whose message matches a pattern.
    Find(QueryArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("who").required(true).args(["user", "all_users"])))]
pub struct QueryArgs {
    pub pattern: String,

    /// Channels to search, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    pub channel: Vec<String>,

    /// Users whose logs to search, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub user: Vec<String>,

    /// Search whole-channel logs instead of user logs.
    #[arg(long)]
    pub all_users: bool,

    /// Half-open period, e.g. `--period 2020-01 2020-02-15`. Defaults to the
    /// current month.
    #[arg(long, num_args = 2, value_names = ["BEGIN", "END"])]
    pub period: Option<Vec<String>>,

    /// ASCII case-insensitive matching.
    #[arg(long)]
    pub caseless: bool,

    /// Treat the pattern as a regular expression.
    #[arg(long)]
    pub regex: bool,

    #[arg(long, default_value = "gempir", value_parser = parse_service)]
    pub service: LogService,
}

fn parse_service(name: &str) -> Result<LogService, String> {
    LogService::from_name(name).ok_or_else(|| format!("unknown log service {name:?}"))
}

impl QueryArgs {
    /// Build the query, resolving the default period against `now`.
    pub fn to_query(&self, now: TimePoint) -> anyhow::Result<Query> {
        let matcher = if self.regex {
            Matcher::regex_with(&self.pattern, self.caseless)
                .with_context(|| format!("invalid regex {:?}", self.pattern))?
        } else {
            Matcher::substring(self.pattern.as_str(), self.caseless)
        };
        let users = if self.all_users {
            UserSelection::All
        } else {
            UserSelection::Users(self.user.clone())
        };
        let period = match self.period.as_deref() {
            Some([begin, end]) => parse_time_period(begin, end)
                .with_context(|| format!("invalid period {begin} {end}"))?,
            Some(other) => anyhow::bail!("--period takes two values, got {}", other.len()),
            None => TimePeriod::current_month(now),
        };
        Ok(Query::new(matcher, self.channel.clone(), users)
            .period(period)
            .service(self.service))
    }
}

/// Install the global subscriber: stderr at `info` by default, or the debug
/// file at `debug` with `--debug`. `RUST_LOG` overrides the level.
pub fn init_tracing(debug: bool) -> anyhow::Result<()> {
    let filter = |default: &str| {
        tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default))
    };
    if debug {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(DEBUG_LOG)
            .with_context(|| format!("opening {DEBUG_LOG}"))?;
        tracing_subscriber::fmt()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .with_env_filter(filter("debug"))
            .init();
        tracing::info!("chatlog debug log started, tail -f {DEBUG_LOG}");
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter("info"))
            .init();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("chatlog").chain(args.iter().copied()))
    }

    fn query_args(cli: Cli) -> QueryArgs {
        match cli.command {
            Command::Count(args) | Command::Find(args) => args,
        }
    }

    #[test]
    fn count_with_users_and_period() {
        let cli = parse(&[
            "count", "kek", "--channel", "foo,bar", "--user", "alice", "--period", "2020-01",
            "2020-03", "--caseless",
        ])
        .unwrap();
        let query = query_args(cli).to_query(Utc::now()).unwrap();
        assert_eq!(query.channels, vec!["foo", "bar"]);
        assert_eq!(query.users, UserSelection::Users(vec!["alice".into()]));
        assert_eq!(query.period.year_months().len(), 2);
        assert_eq!(query.matcher.count("KEK kek"), 2);
    }

    #[test]
    fn default_period_is_current_month() {
        let now = Utc.with_ymd_and_hms(2021, 6, 15, 12, 0, 0).unwrap();
        let cli = parse(&["find", "x", "--channel", "foo", "--all-users"]).unwrap();
        let query = query_args(cli).to_query(now).unwrap();
        assert_eq!(query.period, TimePeriod::current_month(now));
        assert_eq!(query.users, UserSelection::All);
        assert_eq!(query.service, LogService::Gempir);
    }

    #[test]
    fn user_selection_is_required() {
        assert!(parse(&["count", "x", "--channel", "foo"]).is_err());
        assert!(parse(&["count", "x", "--channel", "foo", "--user", "a", "--all-users"]).is_err());
    }

    #[test]
    fn service_and_regex() {
        let cli = parse(&[
            "count", "(", "--channel", "foo", "--all-users", "--regex", "--service", "OverRustle",
        ])
        .unwrap();
        let args = query_args(cli);
        assert_eq!(args.service, LogService::Overrustle);
        assert!(args.to_query(Utc::now()).is_err());
    }
}
