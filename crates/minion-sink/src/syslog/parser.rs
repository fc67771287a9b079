//! Syslog header recognition (RFC 5424 and RFC 3164).
//!
//! Only what the controller needs is extracted: the priority, the event
//! time and the content following the `<PRI>` header. Lines without a
//! recognisable header are kept whole at [`DEFAULT_PRIORITY`].

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// `user.notice`
pub const DEFAULT_PRIORITY: u8 = 13;

static PRI: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)^<(\d{1,3})>(.*)$").ok());

// VERSION SP TIMESTAMP SP HOSTNAME SP APP-NAME SP PROCID SP MSGID SP rest
static RFC5424: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)^(\d{1,2}) (\S+) (\S+) (\S+) (\S+) (\S+) ?(.*)$").ok());

// Mmm dd hh:mm:ss SP rest
static RFC3164: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)^([A-Z][a-z]{2}) {1,2}(\d{1,2}) (\d{2}:\d{2}:\d{2}) (.*)$").ok());

/// One syslog record ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogRecord {
    pub priority: u8,
    /// Event time, epoch milliseconds.
    pub timestamp: i64,
    /// Everything after the `<PRI>` header.
    pub content: String,
    /// The free-form message part, used to spot keep-alives.
    pub message: String,
}

impl SyslogRecord {
    /// The bytes the controller expects: `<PRI>` followed by the content.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("<{}>{}", self.priority, self.content).into_bytes()
    }

    /// Keep-alive lines carry just `X` and are not forwarded.
    pub fn is_keepalive(&self) -> bool {
        self.message.trim() == "X" || self.content.trim() == "X"
    }
}

/// Parses one line received at `received`.
pub fn parse(line: &str, received: DateTime<Utc>) -> SyslogRecord {
    let line = line.trim_end_matches(['\r', '\n', '\0']);
    let received_ms = received.timestamp_millis();

    let Some((priority, content)) = PRI.as_ref().and_then(|re| re.captures(line)).and_then(|c| {
        let pri = c.get(1)?.as_str().parse::<u8>().ok().filter(|p| *p <= 191)?;
        Some((pri, c.get(2)?.as_str().to_string()))
    }) else {
        return SyslogRecord {
            priority: DEFAULT_PRIORITY,
            timestamp: received_ms,
            content: line.to_string(),
            message: line.to_string(),
        };
    };

    let (timestamp, message) = if let Some(c) = RFC5424.as_ref().and_then(|re| re.captures(&content)) {
        let ts = c
            .get(2)
            .and_then(|t| DateTime::parse_from_rfc3339(t.as_str()).ok())
            .map(|t| t.timestamp_millis())
            .unwrap_or(received_ms);
        let rest = c.get(7).map(|m| m.as_str()).unwrap_or_default();
        (ts, strip_structured_data(rest).to_string())
    } else if let Some(c) = RFC3164.as_ref().and_then(|re| re.captures(&content)) {
        let ts = bsd_timestamp(
            c.get(1).map(|m| m.as_str()).unwrap_or_default(),
            c.get(2).map(|m| m.as_str()).unwrap_or_default(),
            c.get(3).map(|m| m.as_str()).unwrap_or_default(),
            received,
        )
        .unwrap_or(received_ms);
        let rest = c.get(4).map(|m| m.as_str()).unwrap_or_default();
        // HOSTNAME SP MSG
        let message = rest.split_once(' ').map(|(_, m)| m).unwrap_or(rest);
        (ts, message.to_string())
    } else {
        (received_ms, content.clone())
    };

    SyslogRecord {
        priority,
        timestamp,
        content,
        message,
    }
}

/// Skips `-` or one or more `[...]` elements at the start of `rest`.
fn strip_structured_data(rest: &str) -> &str {
    if let Some(msg) = rest.strip_prefix('-') {
        return msg.trim_start();
    }
    let mut remaining = rest;
    while remaining.starts_with('[') {
        match remaining.find(']') {
            Some(end) => remaining = &remaining[end + 1..],
            None => return "",
        }
    }
    remaining.trim_start()
}

/// RFC 3164 timestamps lack a year and zone: the receive year and UTC are
/// assumed, stepping back a year for dates in the future.
fn bsd_timestamp(month: &str, day: &str, time: &str, received: DateTime<Utc>) -> Option<i64> {
    let text = format!("{} {month} {day} {time}", received.year());
    let naive = NaiveDateTime::parse_from_str(&text, "%Y %b %d %H:%M:%S").ok()?;
    let mut ts = Utc.from_utc_datetime(&naive);
    if ts > received + chrono::Duration::days(1) {
        let last_year = format!("{} {month} {day} {time}", received.year() - 1);
        let naive = NaiveDateTime::parse_from_str(&last_year, "%Y %b %d %H:%M:%S").ok()?;
        ts = Utc.from_utc_datetime(&naive);
    }
    Some(ts.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_rfc5424() {
        let line = "<165>1 2024-03-10T11:59:58.000Z host app 42 ID47 [exampleSDID@32473 iut=\"3\"] An application event\n";
        let record = parse(line, received());
        assert_eq!(record.priority, 165);
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 10, 11, 59, 58).unwrap().timestamp_millis()
        );
        assert_eq!(record.message, "An application event");
        assert!(record.content.starts_with("1 2024-03-10T11:59:58.000Z host app"));
        assert!(record.to_bytes().starts_with(b"<165>1 2024"));
    }

    #[test]
    fn test_rfc3164() {
        let record = parse("<34>Mar  9 22:14:15 mymachine su: 'su root' failed", received());
        assert_eq!(record.priority, 34);
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 9, 22, 14, 15).unwrap().timestamp_millis()
        );
        assert_eq!(record.message, "su: 'su root' failed");
        assert_eq!(record.content, "Mar  9 22:14:15 mymachine su: 'su root' failed");
    }

    #[test]
    fn test_rfc3164_future_date_is_last_year() {
        let record = parse("<13>Dec 31 23:00:00 host msg", received());
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap().timestamp_millis()
        );
    }

    #[test]
    fn test_unparsable_line_uses_defaults() {
        let record = parse("just some text", received());
        assert_eq!(record.priority, DEFAULT_PRIORITY);
        assert_eq!(record.timestamp, received().timestamp_millis());
        assert_eq!(record.to_bytes(), b"<13>just some text".to_vec());

        let record = parse("<999>bogus priority", received());
        assert_eq!(record.priority, DEFAULT_PRIORITY);
        assert_eq!(record.content, "<999>bogus priority");
    }

    #[test]
    fn test_keepalive() {
        assert!(parse("<13>X", received()).is_keepalive());
        assert!(parse("X", received()).is_keepalive());
        assert!(!parse("<13>Mar 10 11:00:00 host Xylophone", received()).is_keepalive());
    }
}
