//! Typed correction intent
//!
//! The planner core works on `Intent` values, not raw text. Full
//! natural-language parsing is an external collaborator; the keyword parser
//! here is its deterministic in-tree stand-in and is deliberately literal.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// A user's refinement request in typed form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Intent {
    /// Move a block to a new start time, keeping its duration
    Move { target: String, new_start: NaiveTime },
    /// Move a block forward (positive) or back (negative) by minutes
    Shift { target: String, minutes: i64 },
    /// Add a new block; `start: None` lets the planner pick a free slot
    Add {
        label: String,
        duration_minutes: i64,
        start: Option<NaiveTime>,
    },
    /// Remove a block
    Remove { target: String },
    /// Accept the current plan / commit the review
    Approve,
    /// Send the review back for more refinement
    RequestChanges,
}

/// Parse a turn's text into an intent. Returns `None` for anything the
/// keyword grammar does not recognize; the caller responds with guidance.
pub fn parse_intent(text: &str) -> Option<Intent> {
    let text = text.trim();
    let lowered = text.to_lowercase();

    match lowered.as_str() {
        "approve" | "commit" | "done" | "yes" | "looks good" | "ship it" => return Some(Intent::Approve),
        "change" | "changes" | "revise" | "not yet" | "rework" => return Some(Intent::RequestChanges),
        _ => {}
    }

    if let Some(rest) = strip_keyword(&lowered, &["move "]) {
        // "move <target> to <time>"
        let (target, time_str) = rest.rsplit_once(" to ")?;
        let new_start = parse_time(time_str.trim())?;
        return Some(Intent::Move {
            target: target.trim().to_string(),
            new_start,
        });
    }

    if let Some(rest) = strip_keyword(&lowered, &["shift "]) {
        // "shift <target> [by] <+/-minutes>"
        let rest = rest.trim();
        let (target, amount) = rest.rsplit_once(' ')?;
        let target = target.trim().strip_suffix(" by").unwrap_or(target.trim());
        let minutes = parse_signed_minutes(amount.trim())?;
        return Some(Intent::Shift {
            target: target.trim().to_string(),
            minutes,
        });
    }

    if let Some(rest) = strip_keyword(&lowered, &["add "]) {
        // "add <label> <duration> [at <time>]"
        let (head, start) = match rest.rsplit_once(" at ") {
            Some((head, time_str)) => (head, Some(parse_time(time_str.trim())?)),
            None => (rest, None),
        };
        let (label, duration_str) = head.trim().rsplit_once(' ')?;
        let duration_minutes = parse_duration_minutes(duration_str.trim())?;
        return Some(Intent::Add {
            label: label.trim().to_string(),
            duration_minutes,
            start,
        });
    }

    if let Some(rest) = strip_keyword(&lowered, &["remove ", "drop ", "delete "]) {
        return Some(Intent::Remove {
            target: rest.trim().to_string(),
        });
    }

    None
}

fn strip_keyword<'a>(text: &'a str, keywords: &[&str]) -> Option<&'a str> {
    keywords.iter().find_map(|k| text.strip_prefix(k))
}

/// Parse "14:00", "9:30", or a bare hour like "14"
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let (hours, minutes) = match s.split_once(':') {
        Some((h, m)) => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        None => (s.parse::<u32>().ok()?, 0),
    };
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

/// Parse "30m", "2h", "1h30m", or bare minutes like "45"
pub fn parse_duration_minutes(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(minutes) = s.parse::<i64>() {
        return (minutes > 0).then_some(minutes);
    }

    let mut total = 0i64;
    let mut digits = String::new();
    for c in s.chars() {
        match c {
            '0'..='9' => digits.push(c),
            'h' => {
                total += digits.parse::<i64>().ok()? * 60;
                digits.clear();
            }
            'm' => {
                total += digits.parse::<i64>().ok()?;
                digits.clear();
            }
            _ => return None,
        }
    }
    if !digits.is_empty() {
        return None;
    }
    (total > 0).then_some(total)
}

/// Parse "+30m", "-15m", "30" (unsigned defaults to forward)
fn parse_signed_minutes(s: &str) -> Option<i64> {
    let (sign, rest) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    parse_duration_minutes(rest).map(|m| sign * m)
}
