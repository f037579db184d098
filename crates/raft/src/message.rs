//! The four Raft wire messages (`spec.md` §4.10) and the `term:command;`
//! log serialization used by `AppendEntries`'s full-log-install payload.
//! Grounded on `original_source/src/utilities/raft.cpp`'s `handleMessage`
//! and `heartbeatLoop`, which build and parse this exact format.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub term: u64,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftMessage {
    /// `log` carries the whole replicated log as a `term:command;` wire
    /// record (see `serialize_log`/`parse_log`), not a structured
    /// `Vec<LogEntry>` -- full-log-install means every heartbeat resends
    /// the complete history in the same form the original serializes it.
    AppendEntries { term: u64, log: String },
    AppendEntriesResponse { term: u64 },
    RequestVote { term: u64 },
    RequestVoteResponse { term: u64, granted: bool },
    InstallSnapshot { snapshot_index: u64, snapshot_term: u64, bytes: Vec<u8> },
}

/// `term:command;term:command;...` -- no escaping of `;` or `:` inside a
/// command is attempted, matching the original's naive split.
pub fn serialize_log(log: &[LogEntry]) -> String {
    let mut out = String::new();
    for entry in log {
        out.push_str(&entry.term.to_string());
        out.push(':');
        out.push_str(&entry.command);
        out.push(';');
    }
    out
}

pub fn parse_log(serialized: &str) -> Vec<LogEntry> {
    let mut out = Vec::new();
    for entry in serialized.split(';') {
        if entry.is_empty() {
            continue;
        }
        let Some((term, command)) = entry.split_once(':') else {
            continue;
        };
        let Ok(term) = term.parse() else { continue };
        out.push(LogEntry {
            term,
            command: command.to_string(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_serializes_to_empty_string() {
        assert_eq!(serialize_log(&[]), "");
        assert!(parse_log("").is_empty());
    }

    #[test]
    fn log_round_trips_through_the_wire_format() {
        let log = vec![
            LogEntry { term: 1, command: "a".into() },
            LogEntry { term: 2, command: "b".into() },
        ];
        let wire = serialize_log(&log);
        assert_eq!(wire, "1:a;2:b;");
        assert_eq!(parse_log(&wire), log);
    }
}
