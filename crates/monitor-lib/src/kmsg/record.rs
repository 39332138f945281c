//! `/dev/kmsg` record envelope parsing
//!
//! Each record is `<prio>,<seq>,<usec>,<flags>[,...];<message>` followed by
//! optional continuation lines that start with a space. Only the envelope is
//! decoded here; the message text is passed through untouched.

use chrono::{DateTime, Duration, Utc};

/// A decoded kernel log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsgRecord {
    pub priority: u32,
    pub sequence: u64,
    /// Microseconds since boot
    pub timestamp_usec: u64,
    pub message: String,
}

impl KmsgRecord {
    /// Translate the boot-relative timestamp to wall time
    pub fn wall_time(&self, boot_time: DateTime<Utc>) -> DateTime<Utc> {
        boot_time + Duration::microseconds(self.timestamp_usec as i64)
    }
}

/// Parse a single record. Returns `None` for malformed input.
pub fn parse_record(raw: &str) -> Option<KmsgRecord> {
    let (header, body) = raw.split_once(';')?;

    let mut fields = header.split(',');
    let priority = fields.next()?.trim().parse().ok()?;
    let sequence = fields.next()?.trim().parse().ok()?;
    let timestamp_usec = fields.next()?.trim().parse().ok()?;

    // Continuation lines carry key=value metadata, not message text
    let message = body.lines().next().unwrap_or_default().to_string();

    Some(KmsgRecord {
        priority,
        sequence,
        timestamp_usec,
        message,
    })
}

/// Parse every record in a buffer. `/dev/kmsg` hands out one record per
/// read, but plain files and replayed dumps may contain several.
pub fn parse_chunk(chunk: &str) -> Vec<KmsgRecord> {
    let mut records = Vec::new();
    let mut current = String::new();

    for line in chunk.lines() {
        if line.starts_with(' ') {
            continue;
        }
        if !current.is_empty() {
            records.extend(parse_record(&current));
            current.clear();
        }
        current.push_str(line);
    }

    if !current.is_empty() {
        records.extend(parse_record(&current));
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let record = parse_record("6,1234,5678901,-;current_time_unix_nano:42\n").unwrap();

        assert_eq!(record.priority, 6);
        assert_eq!(record.sequence, 1234);
        assert_eq!(record.timestamp_usec, 5678901);
        assert_eq!(record.message, "current_time_unix_nano:42");
    }

    #[test]
    fn test_parse_record_drops_continuation_lines() {
        let raw = "3,55,1000,-,caller=T12;usb 1-1: device descriptor read\n SUBSYSTEM=usb\n DEVICE=c189:1\n";
        let record = parse_record(raw).unwrap();

        assert_eq!(record.message, "usb 1-1: device descriptor read");
    }

    #[test]
    fn test_parse_record_keeps_semicolons_in_message() {
        let record = parse_record("4,1,2,-;a; b; c").unwrap();
        assert_eq!(record.message, "a; b; c");
    }

    #[test]
    fn test_parse_record_malformed() {
        assert!(parse_record("no header here").is_none());
        assert!(parse_record("6,abc,100,-;text").is_none());
        assert!(parse_record("6,1;text").is_none());
    }

    #[test]
    fn test_parse_chunk_multiple_records() {
        let chunk = "6,1,100,-;first\n SUBSYSTEM=mem\n6,2,200,-;second\n6,3,300,-;third\n";
        let records = parse_chunk(chunk);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message, "first");
        assert_eq!(records[2].timestamp_usec, 300);
    }

    #[test]
    fn test_wall_time() {
        let boot = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let record = parse_record("6,1,2500000,-;x").unwrap();

        assert_eq!(
            record.wall_time(boot),
            DateTime::from_timestamp(1_700_000_002, 500_000_000).unwrap()
        );
    }
}
