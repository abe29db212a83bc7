//! Domain-specific assertion macros for chatlog harnesses.
//!
//! These wrap `pretty_assertions` and add context-rich failure messages that
//! make it clear *which* log and *which* line broke the expectation.

/// Assert a log's lines as `(author, message)` pairs, in order.
///
/// ```rust
/// assert_lines!(log, [("alice", "hello world"), ("bob", "hello again")]);
/// ```
#[macro_export]
macro_rules! assert_lines {
    ($log:expr, [$(($name:expr, $message:expr)),* $(,)?]) => {{
        let log: &chatlog_core::Log = &$log;
        let actual: Vec<(String, String)> = log
            .lines()
            .iter()
            .map(|l| (log.name(l).to_string(), log.message(l).to_string()))
            .collect();
        let expected: Vec<(String, String)> =
            vec![$(($name.to_string(), $message.to_string())),*];
        pretty_assertions::assert_eq!(actual, expected, "lines of log {}", log.id());
    }};
}

/// Assert a log's distinct author names, in sorted order.
#[macro_export]
macro_rules! assert_names {
    ($log:expr, [$($name:expr),* $(,)?]) => {{
        let log: &chatlog_core::Log = &$log;
        let actual: Vec<&str> = log.names().collect();
        let expected: Vec<&str> = vec![$($name),*];
        pretty_assertions::assert_eq!(actual, expected, "names of log {}", log.id());
    }};
}

/// Assert an answer, printing it on mismatch.
#[macro_export]
macro_rules! assert_answer {
    ($answer:expr, $expected:expr) => {{
        let answer: chatlog_fetch::Answer = $answer;
        let expected: chatlog_fetch::Answer = $expected;
        pretty_assertions::assert_eq!(answer, expected, "answer was {}", answer);
    }};
}
