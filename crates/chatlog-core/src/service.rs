//! Remote log services: line grammars and request-path builders.
//!
//! Both services serve plain text, one chat line per `\n`:
//!
//! ```text
//! gempir:      [2020-01-01 12:00:00] #channel alice: hello world
//! overrustle:  [2020-01-01 12:00:00 UTC] alice: hello world
//! ```
//!
//! Lines that do not fit the grammar are skipped. A body equal to the
//! service's not-found payload means there is no such log.

use crate::model::{LineParser, LineView, Log, LogIdentifier, Span};
use crate::time::{TimePeriod, TimePoint, YearMonth};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

const GEMPIR_NOT_FOUND: &str = r#"{"message":"Failure reading log"}"#;
const OVERRUSTLE_NOT_FOUND: &str = "didn't find any logs for this user";

/// A supported remote log service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogService {
    #[default]
    Gempir,
    Overrustle,
}

impl LogService {
    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("gempir") {
            Some(LogService::Gempir)
        } else if name.eq_ignore_ascii_case("overrustle") {
            Some(LogService::Overrustle)
        } else {
            None
        }
    }

    pub fn parser(&self) -> LineParser {
        match self {
            LogService::Gempir => parse_gempir,
            LogService::Overrustle => parse_overrustle,
        }
    }

    /// Turn a response body into a [`Log`].
    pub fn parse(&self, id: LogIdentifier, body: String) -> Log {
        Log::parse(id, body, self.parser())
    }

    /// Identifier and request path for one user's log of one month.
    pub fn user_target(&self, channel: &str, user: &str, ym: YearMonth) -> (LogIdentifier, String) {
        let id = LogIdentifier::user_log(channel, user, TimePeriod::month(ym));
        let path = match self {
            LogService::Gempir => {
                format!("/channel/{channel}/user/{user}/{}/{}", ym.year, ym.month)
            }
            LogService::Overrustle => format!(
                "/{channel} chatlog/{} {}/userlogs/{user}.txt",
                ym.month_name(),
                ym.year
            ),
        };
        (id, encode_path(&path))
    }

    /// Identifier and request path for a whole channel's log of one day.
    pub fn channel_target(&self, channel: &str, date: NaiveDate) -> (LogIdentifier, String) {
        let id = LogIdentifier::channel_log(channel, TimePeriod::day(date));
        let ym = YearMonth::of(date);
        let path = match self {
            LogService::Gempir => format!(
                "/channel/{channel}/{}/{}/{}",
                ym.year,
                ym.month,
                chrono::Datelike::day(&date)
            ),
            LogService::Overrustle => format!(
                "/{channel} chatlog/{} {}/{}.txt",
                ym.month_name(),
                ym.year,
                date.format("%Y-%m-%d")
            ),
        };
        (id, encode_path(&path))
    }
}

impl std::fmt::Display for LogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogService::Gempir => write!(f, "gempir"),
            LogService::Overrustle => write!(f, "overrustle"),
        }
    }
}

/// Percent-encode the characters a request target may not carry verbatim.
fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '%' => out.push_str("%25"),
            c => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// `[YYYY-MM-DD HH:MM:SS] #channel name: message`
pub fn parse_gempir(data: &str) -> Option<Vec<LineView>> {
    if data.trim() == GEMPIR_NOT_FOUND {
        return None;
    }
    Some(scan(data, |line| {
        let (time, rest) = split_time(line)?;
        let time = parse_time(time, "%Y-%m-%d %H:%M:%S")?;
        let (_channel, rest) = rest.split_once(' ')?;
        let (name, message) = rest.split_once(':')?;
        let message = message.strip_prefix(' ').unwrap_or(message);
        Some((time, name, message))
    }))
}

/// `[YYYY-MM-DD HH:MM:SS UTC] name: message`
pub fn parse_overrustle(data: &str) -> Option<Vec<LineView>> {
    if data.trim() == OVERRUSTLE_NOT_FOUND {
        return None;
    }
    Some(scan(data, |line| {
        let (time, rest) = split_time(line)?;
        let time = parse_time(time, "%Y-%m-%d %H:%M:%S UTC")?;
        let (name, message) = rest.split_once(' ')?;
        let name = name.strip_suffix(':')?;
        Some((time, name, message))
    }))
}

/// Split `data` on `\n` and keep every line `split` accepts.
fn scan<'a, F>(data: &'a str, split: F) -> Vec<LineView>
where
    F: Fn(&'a str) -> Option<(TimePoint, &'a str, &'a str)>,
{
    data.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (time, name, message) = split(line)?;
            Some(LineView {
                time,
                name: Span::of(data, name),
                message: Span::of(data, message),
            })
        })
        .collect()
}

/// `"[time] rest"` → `("time", "rest")`
fn split_time(line: &str) -> Option<(&str, &str)> {
    line.strip_prefix('[')?.split_once("] ")
}

fn parse_time(text: &str, format: &str) -> Option<TimePoint> {
    NaiveDateTime::parse_from_str(text, format)
        .ok()
        .map(|dt| dt.and_utc())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    fn id() -> LogIdentifier {
        LogIdentifier::channel_log("foo", TimePeriod::month(ym(2020, 1)))
    }

    fn triples(log: &Log) -> Vec<(String, String)> {
        log.lines()
            .iter()
            .map(|l| (log.name(l).to_string(), log.message(l).to_string()))
            .collect()
    }

    #[test]
    fn gempir_lines_are_split() {
        let body = "[2020-01-01 12:00:00] #foo alice: hello world\n\
                    [2020-01-01 12:00:05] #foo bob: hello: again\r\n";
        let log = LogService::Gempir.parse(id(), body.to_string());
        assert!(log.is_valid());
        assert_eq!(
            triples(&log),
            vec![
                ("alice".to_string(), "hello world".to_string()),
                ("bob".to_string(), "hello: again".to_string()),
            ]
        );
        assert_eq!(
            log.lines()[1].time,
            Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 5).unwrap()
        );
    }

    #[test]
    fn gempir_bad_lines_are_skipped() {
        let body = "garbage\n\
                    [not a time] #foo alice: x\n\
                    [2020-01-01 12:00:00] nospace\n\
                    [2020-01-01 12:00:00] #foo nocolon\n\
                    [2020-01-01 12:00:01] #foo carol: kept";
        let log = LogService::Gempir.parse(id(), body.to_string());
        assert_eq!(triples(&log), vec![("carol".to_string(), "kept".to_string())]);
    }

    #[test]
    fn gempir_not_found_is_invalid() {
        let log = LogService::Gempir.parse(id(), GEMPIR_NOT_FOUND.to_string());
        assert!(!log.is_valid());
    }

    #[test]
    fn overrustle_lines_are_split() {
        let body = "[2020-01-01 12:00:00 UTC] alice: hello world\n\
                    [2020-01-01 12:00:00] bob: no zone\n\
                    [2020-01-01 12:00:01 UTC] carol no colon\n";
        let log = LogService::Overrustle.parse(id(), body.to_string());
        assert_eq!(
            triples(&log),
            vec![("alice".to_string(), "hello world".to_string())]
        );
        assert!(!LogService::Overrustle
            .parse(id(), OVERRUSTLE_NOT_FOUND.to_string())
            .is_valid());
    }

    #[test]
    fn empty_body_is_a_valid_empty_log() {
        let log = LogService::Gempir.parse(id(), String::new());
        assert!(log.is_valid());
        assert!(log.is_empty());
    }

    #[test]
    fn gempir_paths() {
        let (id, path) = LogService::Gempir.user_target("pajlada", "alice", ym(2019, 2));
        assert_eq!(path, "/channel/pajlada/user/alice/2019/2");
        assert_eq!(id.user, "alice");
        assert_eq!(id.period, TimePeriod::month(ym(2019, 2)));

        let date = NaiveDate::from_ymd_opt(2019, 2, 8).unwrap();
        let (id, path) = LogService::Gempir.channel_target("pajlada", date);
        assert_eq!(path, "/channel/pajlada/2019/2/8");
        assert!(!id.is_user_log());
        assert_eq!(id.period, TimePeriod::day(date));
    }

    #[test]
    fn overrustle_paths_are_encoded() {
        let (_, path) = LogService::Overrustle.user_target("Destiny", "alice", ym(2019, 2));
        assert_eq!(path, "/Destiny%20chatlog/February%202019/userlogs/alice.txt");

        let date = NaiveDate::from_ymd_opt(2019, 2, 8).unwrap();
        let (_, path) = LogService::Overrustle.channel_target("Destiny", date);
        assert_eq!(path, "/Destiny%20chatlog/February%202019/2019-02-08.txt");
    }

    #[test]
    fn service_names_are_caseless() {
        assert_eq!(LogService::from_name("GEMPIR"), Some(LogService::Gempir));
        assert_eq!(LogService::from_name("OverRustle"), Some(LogService::Overrustle));
        assert_eq!(LogService::from_name("other"), None);
    }
}
