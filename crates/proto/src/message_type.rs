/// Stable small-integer message type codes. The serialized form carries the
/// integer in decimal, per the historical wire format this reproduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum MessageType {
    CreateFile = 0,
    WriteFile = 1,
    ReadFile = 2,
    FileCreated = 3,
    FileWritten = 4,
    FileRead = 5,
    FileRemoved = 6,
    RegisterNode = 7,
    Heartbeat = 8,
    ReplicateFileCommand = 9,
    ReceiveFileCommand = 10,
    DeleteFile = 11,
    GetAttr = 12,
    GetAttrResponse = 13,
    Readdir = 14,
    ReaddirResponse = 15,
    Access = 16,
    AccessResponse = 17,
    Open = 18,
    OpenResponse = 19,
    CreateFileResponse = 20,
    Read = 21,
    ReadResponse = 22,
    Write = 23,
    WriteResponse = 24,
    Unlink = 25,
    UnlinkResponse = 26,
    Rename = 27,
    RenameResponse = 28,
    Mkdir = 29,
    MkdirResponse = 30,
    Rmdir = 31,
    RmdirResponse = 32,
    Statx = 33,
    StatxResponse = 34,
    Utimens = 35,
    UtimensResponse = 36,
    NodeReadFileChunk = 37,
    NodeReadFileChunkResponse = 38,
    NodeWriteFileChunk = 39,
    NodeWriteFileChunkResponse = 40,
    RaftAppendEntries = 41,
    RaftAppendEntriesResponse = 42,
    RaftRequestVote = 43,
    RaftRequestVoteResponse = 44,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown message type code {0}")]
pub struct UnknownMessageType(pub i64);

impl TryFrom<i64> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        use MessageType::*;
        Ok(match code {
            0 => CreateFile,
            1 => WriteFile,
            2 => ReadFile,
            3 => FileCreated,
            4 => FileWritten,
            5 => FileRead,
            6 => FileRemoved,
            7 => RegisterNode,
            8 => Heartbeat,
            9 => ReplicateFileCommand,
            10 => ReceiveFileCommand,
            11 => DeleteFile,
            12 => GetAttr,
            13 => GetAttrResponse,
            14 => Readdir,
            15 => ReaddirResponse,
            16 => Access,
            17 => AccessResponse,
            18 => Open,
            19 => OpenResponse,
            20 => CreateFileResponse,
            21 => Read,
            22 => ReadResponse,
            23 => Write,
            24 => WriteResponse,
            25 => Unlink,
            26 => UnlinkResponse,
            27 => Rename,
            28 => RenameResponse,
            29 => Mkdir,
            30 => MkdirResponse,
            31 => Rmdir,
            32 => RmdirResponse,
            33 => Statx,
            34 => StatxResponse,
            35 => Utimens,
            36 => UtimensResponse,
            37 => NodeReadFileChunk,
            38 => NodeReadFileChunkResponse,
            39 => NodeWriteFileChunk,
            40 => NodeWriteFileChunkResponse,
            41 => RaftAppendEntries,
            42 => RaftAppendEntriesResponse,
            43 => RaftRequestVote,
            44 => RaftRequestVoteResponse,
            other => return Err(UnknownMessageType(other)),
        })
    }
}

impl From<MessageType> for i64 {
    fn from(t: MessageType) -> i64 {
        t as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_round_trips_through_its_code() {
        let all = [
            MessageType::CreateFile,
            MessageType::WriteFile,
            MessageType::ReadFile,
            MessageType::FileCreated,
            MessageType::FileWritten,
            MessageType::FileRead,
            MessageType::FileRemoved,
            MessageType::RegisterNode,
            MessageType::Heartbeat,
            MessageType::ReplicateFileCommand,
            MessageType::ReceiveFileCommand,
            MessageType::DeleteFile,
            MessageType::RaftAppendEntries,
            MessageType::RaftAppendEntriesResponse,
            MessageType::RaftRequestVote,
            MessageType::RaftRequestVoteResponse,
        ];
        for t in all {
            let code: i64 = t.into();
            assert_eq!(MessageType::try_from(code).unwrap(), t);
        }
    }

    #[test]
    fn unknown_code_is_an_error() {
        assert_eq!(MessageType::try_from(999), Err(UnknownMessageType(999)));
    }
}
