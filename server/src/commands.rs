//! The small set of mutating operations proposed through the Raft node.
//! Each request handler that mutates the namespace builds one of these,
//! submits it via `RaftNode::append_command`, and the apply callback
//! (wired up in `main.rs`) is what actually touches the
//! `MetadataAuthority`. Read-only RPCs bypass this path entirely and call
//! the authority directly, per `spec.md` §4.9's operation table.

use simplidfs_authority::MetadataAuthority;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityCommand {
    AddFile { filename: String, preferred: Vec<String>, mode: u32 },
    RemoveFile { filename: String },
    WriteFile { filename: String, offset: u64, len: u64 },
    RenameFile { old: String, new: String },
}

impl AuthorityCommand {
    /// `kind|filename|field2|field3` -- deliberately flat like the rest of
    /// this system's wire formats; there is no nesting to escape.
    pub fn encode(&self) -> String {
        match self {
            AuthorityCommand::AddFile { filename, preferred, mode } => {
                format!("ADD_FILE|{filename}|{}|{mode}", preferred.join(","))
            }
            AuthorityCommand::RemoveFile { filename } => format!("REMOVE_FILE|{filename}"),
            AuthorityCommand::WriteFile { filename, offset, len } => {
                format!("WRITE_FILE|{filename}|{offset}|{len}")
            }
            AuthorityCommand::RenameFile { old, new } => format!("RENAME_FILE|{old}|{new}"),
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        let mut parts = s.split('|');
        match parts.next()? {
            "ADD_FILE" => {
                let filename = parts.next()?.to_string();
                let preferred_raw = parts.next()?;
                let preferred = if preferred_raw.is_empty() {
                    Vec::new()
                } else {
                    preferred_raw.split(',').map(|s| s.to_string()).collect()
                };
                let mode: u32 = parts.next()?.parse().ok()?;
                Some(AuthorityCommand::AddFile { filename, preferred, mode })
            }
            "REMOVE_FILE" => Some(AuthorityCommand::RemoveFile { filename: parts.next()?.to_string() }),
            "WRITE_FILE" => {
                let filename = parts.next()?.to_string();
                let offset: u64 = parts.next()?.parse().ok()?;
                let len: u64 = parts.next()?.parse().ok()?;
                Some(AuthorityCommand::WriteFile { filename, offset, len })
            }
            "RENAME_FILE" => {
                let old = parts.next()?.to_string();
                let new = parts.next()?.to_string();
                Some(AuthorityCommand::RenameFile { old, new })
            }
            _ => None,
        }
    }

    pub fn apply(&self, authority: &MetadataAuthority) {
        match self {
            AuthorityCommand::AddFile { filename, preferred, mode } => {
                authority.add_file(filename, preferred, *mode);
            }
            AuthorityCommand::RemoveFile { filename } => {
                authority.remove_file(filename);
            }
            AuthorityCommand::WriteFile { filename, offset, len } => {
                let _ = authority.write_file_data(filename, *offset, *len);
            }
            AuthorityCommand::RenameFile { old, new } => {
                authority.rename_file_entry(old, new);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_round_trips_through_its_wire_encoding() {
        let commands = vec![
            AuthorityCommand::AddFile {
                filename: "f".into(),
                preferred: vec!["n1".into(), "n2".into()],
                mode: 0o644,
            },
            AuthorityCommand::AddFile { filename: "g".into(), preferred: vec![], mode: 0 },
            AuthorityCommand::RemoveFile { filename: "f".into() },
            AuthorityCommand::WriteFile { filename: "f".into(), offset: 10, len: 5 },
            AuthorityCommand::RenameFile { old: "a".into(), new: "b".into() },
        ];
        for command in commands {
            let wire = command.encode();
            assert_eq!(AuthorityCommand::decode(&wire), Some(command));
        }
    }

    #[test]
    fn garbage_input_fails_to_decode() {
        assert_eq!(AuthorityCommand::decode("NOT_A_COMMAND|x"), None);
        assert_eq!(AuthorityCommand::decode(""), None);
    }
}
