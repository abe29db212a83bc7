//! Message matchers for the `count` and `find` commands.
//!
//! A [`Matcher`] is either a plain substring (optionally ASCII-caseless) or a
//! regular expression.
//!
//! ```text
//!              count("aaaa")        is_match("xaay")
//! "aa"         3  (overlapping)     true  (contains)
//! /a+/         1  (non-overlapping) false (whole text)
//! ```

use regex::{Regex, RegexBuilder};

/// What to look for inside chat messages.
#[derive(Debug, Clone)]
pub enum Matcher {
    Substring { needle: String, caseless: bool },
    Regex { any: Regex, whole: Regex },
}

impl Matcher {
    pub fn substring(needle: impl Into<String>, caseless: bool) -> Self {
        let needle = needle.into();
        let needle = if caseless {
            needle.to_ascii_lowercase()
        } else {
            needle
        };
        Matcher::Substring { needle, caseless }
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Self::regex_with(pattern, false)
    }

    pub fn regex_with(pattern: &str, caseless: bool) -> Result<Self, regex::Error> {
        let build = |p: &str| RegexBuilder::new(p).case_insensitive(caseless).build();
        Ok(Matcher::Regex {
            any: build(pattern)?,
            whole: build(&format!("^(?:{pattern})$"))?,
        })
    }

    /// Number of matches in `text`.
    ///
    /// Substrings count overlapping hits; an empty needle counts nothing.
    /// Regexes count non-overlapping matches.
    pub fn count(&self, text: &str) -> usize {
        match self {
            Matcher::Substring { needle, caseless } => {
                let needle = needle.as_bytes();
                if needle.is_empty() || needle.len() > text.len() {
                    return 0;
                }
                text.as_bytes()
                    .windows(needle.len())
                    .filter(|window| {
                        if *caseless {
                            window.eq_ignore_ascii_case(needle)
                        } else {
                            *window == needle
                        }
                    })
                    .count()
            }
            Matcher::Regex { any, .. } => any.find_iter(text).count(),
        }
    }

    /// `true` when `text` contains the substring, or the regex matches all
    /// of `text`.
    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Substring { needle, caseless } => {
                if *caseless {
                    text.to_ascii_lowercase().contains(needle.as_str())
                } else {
                    text.contains(needle.as_str())
                }
            }
            Matcher::Regex { whole, .. } => whole.is_match(text),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
