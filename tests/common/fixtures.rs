//! Canned service bodies and periods used across harnesses.

use chatlog_core::{TimePeriod, YearMonth};

/// Two lines from two authors in January 2020.
pub const SCENARIO_A: &str = "\
[2020-01-01 00:00:01] #foo alice: hello world
[2020-01-01 00:00:02] #foo bob: hello again
";

/// A busier gempir channel log: repeated authors, a malformed line, and a
/// line outside January.
pub const GEMPIR_CHANNEL: &str = "\
[2020-01-03 10:00:00] #foo alice: kek
[2020-01-03 10:00:05] #foo bob: KEK kek
this line is garbage
[2020-01-03 10:01:00] #foo alice: nothing to see
[2020-01-03 10:02:00] #foo carol: kekkek
[2020-02-01 00:00:00] #foo alice: kek from february
";

/// Overrustle user log with a CRLF ending and an unterminated final line.
pub const OVERRUSTLE_USER: &str = "\
[2020-01-05 08:00:00 UTC] alice: hello kek\r
[2020-01-06 09:30:00 UTC] alice: second line";

pub const GEMPIR_NOT_FOUND: &str = r#"{"message":"Failure reading log"}"#;
pub const OVERRUSTLE_NOT_FOUND: &str = "didn't find any logs for this user";

pub fn month(year: i32, month: u32) -> TimePeriod {
    TimePeriod::month(YearMonth::new(year, month).expect("valid month"))
}

pub fn jan_2020() -> TimePeriod {
    month(2020, 1)
}
