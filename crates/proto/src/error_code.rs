/// POSIX-style error codes carried in every RPC response. `0` means success.
/// Chosen for their familiarity at the FUSE boundary (`spec.md` §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    ENoEnt = 2,
    EIo = 5,
    EAcces = 13,
    EExist = 17,
    ENotDir = 20,
    EIsDir = 21,
    EInval = 22,
    ENoSpc = 28,
    EBusy = 16,
    ENotEmpty = 39,
    EHostUnreach = 113,
    ENoSys = 38,
}

impl ErrorCode {
    pub fn is_success(self) -> bool {
        matches!(self, ErrorCode::Success)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown error code {0}")]
pub struct UnknownErrorCode(pub i32);

impl TryFrom<i32> for ErrorCode {
    type Error = UnknownErrorCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        use ErrorCode::*;
        Ok(match code {
            0 => Success,
            2 => ENoEnt,
            5 => EIo,
            13 => EAcces,
            16 => EBusy,
            17 => EExist,
            20 => ENotDir,
            21 => EIsDir,
            22 => EInval,
            28 => ENoSpc,
            38 => ENoSys,
            39 => ENotEmpty,
            113 => EHostUnreach,
            other => return Err(UnknownErrorCode(other)),
        })
    }
}

impl From<ErrorCode> for i32 {
    fn from(e: ErrorCode) -> i32 {
        e as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_zero() {
        assert_eq!(i32::from(ErrorCode::Success), 0);
        assert!(ErrorCode::Success.is_success());
    }

    #[test]
    fn every_variant_round_trips() {
        let all = [
            ErrorCode::Success,
            ErrorCode::ENoEnt,
            ErrorCode::EExist,
            ErrorCode::EAcces,
            ErrorCode::EBusy,
            ErrorCode::EIsDir,
            ErrorCode::ENotDir,
            ErrorCode::ENotEmpty,
            ErrorCode::EInval,
            ErrorCode::ENoSpc,
            ErrorCode::EIo,
            ErrorCode::EHostUnreach,
            ErrorCode::ENoSys,
        ];
        for e in all {
            let code: i32 = e.into();
            assert_eq!(ErrorCode::try_from(code).unwrap(), e);
        }
    }
}
