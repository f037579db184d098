//! Translates one request `Payload` into an authority/Raft call and a
//! response `Payload`, per the RPC table in `spec.md` §4.9 and the message
//! type codes in §6. Mutating operations are pre-validated against the
//! authority's current state (so the caller gets a meaningful error code
//! immediately), then proposed through Raft; the apply callback performs
//! the actual mutation. Read-only operations go straight to the
//! authority.

use std::sync::Arc;

use simplidfs_authority::MetadataAuthority;
use simplidfs_proto::{ErrorCode, MessageType, Payload};
use simplidfs_raft::RaftNode;

use crate::commands::AuthorityCommand;

fn response(msg_type: MessageType, error_code: ErrorCode) -> Payload {
    Payload {
        msg_type: msg_type as i64,
        error_code: i32::from(error_code) as i64,
        ..Default::default()
    }
}

fn text(field: &[u8]) -> String {
    String::from_utf8_lossy(field).into_owned()
}

pub fn handle(payload: Payload, authority: &Arc<MetadataAuthority>, raft: &Arc<RaftNode>) -> Payload {
    let Ok(msg_type) = MessageType::try_from(payload.msg_type) else {
        return response(MessageType::FileRemoved, ErrorCode::EInval);
    };

    match msg_type {
        MessageType::RegisterNode => {
            let id = text(&payload.node_address);
            authority.register_node(&id, &id, payload.node_port as u16);
            response(MessageType::FileCreated, ErrorCode::Success)
        }
        MessageType::Heartbeat => {
            let id = text(&payload.node_address);
            let code = authority.heartbeat(&id);
            response(MessageType::FileCreated, ErrorCode::Success.min_with(code))
        }
        MessageType::CreateFile => {
            let filename = text(&payload.filename);
            if authority.get_attributes(&filename).is_ok() {
                return response(MessageType::CreateFileResponse, ErrorCode::EExist);
            }
            let preferred = if payload.path.is_empty() {
                Vec::new()
            } else {
                text(&payload.path).split(',').map(|s| s.to_string()).collect()
            };
            raft.append_command(
                AuthorityCommand::AddFile { filename: filename.clone(), preferred, mode: payload.mode as u32 }
                    .encode(),
            );
            let code = if authority.get_attributes(&filename).is_ok() {
                ErrorCode::Success
            } else {
                ErrorCode::ENoSpc
            };
            response(MessageType::CreateFileResponse, code)
        }
        MessageType::Unlink => {
            let filename = text(&payload.filename);
            if authority.get_attributes(&filename).is_err() {
                return response(MessageType::UnlinkResponse, ErrorCode::ENoEnt);
            }
            raft.append_command(AuthorityCommand::RemoveFile { filename }.encode());
            response(MessageType::UnlinkResponse, ErrorCode::Success)
        }
        MessageType::Write => {
            let filename = text(&payload.filename);
            if authority.get_attributes(&filename).is_err() {
                return response(MessageType::WriteResponse, ErrorCode::ENoEnt);
            }
            let len = payload.data.len() as u64;
            raft.append_command(
                AuthorityCommand::WriteFile { filename, offset: payload.offset.max(0) as u64, len }.encode(),
            );
            let mut resp = response(MessageType::WriteResponse, ErrorCode::Success);
            resp.size = len as i64;
            resp
        }
        MessageType::Read => {
            let filename = text(&payload.filename);
            match authority.read_file_data(&filename, payload.offset.max(0) as u64, payload.size.max(0) as u64) {
                Ok(bytes_read) => {
                    let mut resp = response(MessageType::ReadResponse, ErrorCode::Success);
                    resp.size = bytes_read as i64;
                    resp
                }
                Err(code) => response(MessageType::ReadResponse, code),
            }
        }
        MessageType::Rename => {
            let old = text(&payload.path);
            let new = text(&payload.new_path);
            if authority.get_attributes(&old).is_err() {
                return response(MessageType::RenameResponse, ErrorCode::ENoEnt);
            }
            if authority.get_attributes(&new).is_ok() {
                return response(MessageType::RenameResponse, ErrorCode::EExist);
            }
            raft.append_command(AuthorityCommand::RenameFile { old, new }.encode());
            response(MessageType::RenameResponse, ErrorCode::Success)
        }
        MessageType::GetAttr => {
            let filename = text(&payload.filename);
            match authority.get_attributes(&filename) {
                Ok((mode, uid, gid, size)) => {
                    let mut resp = response(MessageType::GetAttrResponse, ErrorCode::Success);
                    resp.mode = mode as i64;
                    resp.uid = uid as i64;
                    resp.gid = gid as i64;
                    resp.size = size as i64;
                    resp
                }
                Err(code) => response(MessageType::GetAttrResponse, code),
            }
        }
        MessageType::Readdir => {
            let files = authority.list_files();
            let mut resp = response(MessageType::ReaddirResponse, ErrorCode::Success);
            resp.data = files.join(",").into_bytes();
            resp
        }
        MessageType::Access => {
            let filename = text(&payload.filename);
            let code = authority.check_access(&filename, payload.mode as u32);
            response(MessageType::AccessResponse, code)
        }
        MessageType::Open => {
            let filename = text(&payload.filename);
            let code = authority.open_file(&filename, payload.mode as u32);
            response(MessageType::OpenResponse, code)
        }
        _ => response(MessageType::FileRemoved, ErrorCode::ENoSys),
    }
}

trait MinCode {
    fn min_with(self, other: ErrorCode) -> ErrorCode;
}

impl MinCode for ErrorCode {
    /// `Success` wins only if both sides are `Success`; otherwise surface
    /// whichever side carries the real error. Used where a direct
    /// authority call's own error code needs to flow through unchanged.
    fn min_with(self, other: ErrorCode) -> ErrorCode {
        if self == ErrorCode::Success {
            other
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplidfs_health::NodeHealthCache;
    use std::sync::Arc as StdArc;

    fn test_authority() -> Arc<MetadataAuthority> {
        Arc::new(MetadataAuthority::new(
            StdArc::new(NodeHealthCache::with_defaults()),
            simplidfs_authority::AuthorityConfig::default(),
        ))
    }

    fn test_raft(authority: Arc<MetadataAuthority>) -> Arc<RaftNode> {
        Arc::new(RaftNode::new(
            "solo",
            vec![],
            Box::new(|_, _| {}),
            Box::new(move |cmd: &str| {
                if let Some(command) = AuthorityCommand::decode(cmd) {
                    command.apply(&authority);
                }
            }),
            StdArc::new(simplidfs_config::MetricsRegistry::new()),
        ))
    }

    #[test]
    fn create_file_round_trips_through_raft_into_the_authority() {
        let authority = test_authority();
        authority.register_node("n1", "h", 1);
        let raft = test_raft(authority.clone());
        // A single-node cluster never completes a normal election (see
        // `simplidfs-raft`'s own tests), so bootstrap it directly.
        raft.bootstrap_single_node();
        let request = Payload {
            msg_type: MessageType::CreateFile as i64,
            filename: b"f".to_vec(),
            ..Default::default()
        };
        let resp = handle(request, &authority, &raft);
        assert_eq!(resp.error_code, i32::from(ErrorCode::Success) as i64);
        assert!(authority.get_attributes("f").is_ok());
        raft.stop();
    }

    #[test]
    fn create_file_with_no_leader_never_applies_and_reports_enospc() {
        let authority = test_authority();
        authority.register_node("n1", "h", 1);
        let raft = test_raft(authority.clone());
        let request = Payload {
            msg_type: MessageType::CreateFile as i64,
            filename: b"f".to_vec(),
            ..Default::default()
        };
        let resp = handle(request, &authority, &raft);
        assert_eq!(resp.error_code, i32::from(ErrorCode::ENoSpc) as i64);
    }

    #[test]
    fn getattr_on_a_missing_file_is_enoent() {
        let authority = test_authority();
        let raft = test_raft(authority.clone());
        let request = Payload {
            msg_type: MessageType::GetAttr as i64,
            filename: b"missing".to_vec(),
            ..Default::default()
        };
        let resp = handle(request, &authority, &raft);
        assert_eq!(resp.error_code, i32::from(ErrorCode::ENoEnt) as i64);
    }

    #[test]
    fn readdir_lists_every_filename() {
        let authority = test_authority();
        authority.register_node("n1", "h", 1);
        authority.add_file("a", &[], 0);
        authority.add_file("b", &[], 0);
        let raft = test_raft(authority.clone());
        let request = Payload { msg_type: MessageType::Readdir as i64, ..Default::default() };
        let resp = handle(request, &authority, &raft);
        let names = text(&resp.data);
        assert!(names.contains('a') && names.contains('b'));
    }
}
