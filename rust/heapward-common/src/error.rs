use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn out_of_memory(requested: usize, reason: impl Into<String>) -> Error {
        Error(
            ErrorKind::OutOfMemory {
                requested,
                reason: reason.into(),
            }
            .into(),
        )
    }

    pub fn ownership_violation(block: u64, owner: u64, requester: u64) -> Error {
        Error(
            ErrorKind::OwnershipViolation {
                block,
                owner,
                requester,
            }
            .into(),
        )
    }

    pub fn borrow_conflict(block: u64, reason: ConflictReason) -> Error {
        Error(ErrorKind::BorrowConflict { block, reason }.into())
    }

    pub fn unknown_block(block: u64) -> Error {
        Error(ErrorKind::UnknownBlock { block }.into())
    }

    pub fn block_borrowed(block: u64, state: impl Into<String>) -> Error {
        Error(
            ErrorKind::BlockBorrowed {
                block,
                state: state.into(),
            }
            .into(),
        )
    }

    pub fn return_mismatch(block: u64, kind: BorrowKind, state: impl Into<String>) -> Error {
        Error(
            ErrorKind::ReturnMismatch {
                block,
                kind,
                state: state.into(),
            }
            .into(),
        )
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.kind(), ErrorKind::OutOfMemory { .. })
    }

    pub fn is_ownership_violation(&self) -> bool {
        matches!(self.kind(), ErrorKind::OwnershipViolation { .. })
    }

    pub fn is_borrow_conflict(&self) -> bool {
        matches!(self.kind(), ErrorKind::BorrowConflict { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("out of memory: cannot allocate {requested} bytes ({reason})")]
    OutOfMemory { requested: usize, reason: String },

    #[error("ownership violation: owner #{requester} cannot free block #{block} owned by #{owner}")]
    OwnershipViolation {
        block: u64,
        owner: u64,
        requester: u64,
    },

    #[error("borrow conflict on block #{block}: {reason}")]
    BorrowConflict { block: u64, reason: ConflictReason },

    #[error("block #{block} is not allocated")]
    UnknownBlock { block: u64 },

    #[error("block #{block} cannot be freed while borrowed ({state})")]
    BlockBorrowed { block: u64, state: String },

    #[error("cannot return a {kind} borrow of block #{block} ({state})")]
    ReturnMismatch {
        block: u64,
        kind: BorrowKind,
        state: String,
    },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },
}

/// Why a borrow request was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictReason {
    /// An exclusive borrow was requested while shared or exclusive borrows exist.
    ExclusiveWhileBorrowed,
    /// A shared borrow was requested while an exclusive borrow exists.
    SharedWhileExclusive,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::ExclusiveWhileBorrowed => {
                f.write_str("cannot borrow mutably while other borrows exist")
            }
            ConflictReason::SharedWhileExclusive => {
                f.write_str("cannot borrow immutably while a mutable borrow exists")
            }
        }
    }
}

/// The access mode of a borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorrowKind {
    /// Read-only access; any number may coexist.
    Shared,
    /// Read-write access; excludes every other borrow.
    Exclusive,
}

impl BorrowKind {
    /// Maps the `exclusive` flag used by C-style callers onto a kind.
    pub fn from_exclusive(exclusive: bool) -> BorrowKind {
        if exclusive {
            BorrowKind::Exclusive
        } else {
            BorrowKind::Shared
        }
    }

    pub fn is_exclusive(self) -> bool {
        self == BorrowKind::Exclusive
    }
}

impl std::fmt::Display for BorrowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BorrowKind::Shared => f.write_str("shared"),
            BorrowKind::Exclusive => f.write_str("exclusive"),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_messages() {
        let err = Error::borrow_conflict(7, ConflictReason::ExclusiveWhileBorrowed);
        assert!(err.is_borrow_conflict());
        assert_eq!(
            err.to_string(),
            "borrow conflict on block #7: cannot borrow mutably while other borrows exist"
        );

        let err = Error::borrow_conflict(7, ConflictReason::SharedWhileExclusive);
        assert_eq!(
            err.to_string(),
            "borrow conflict on block #7: cannot borrow immutably while a mutable borrow exists"
        );
    }

    #[test]
    fn test_kind_round_trip() {
        let err = Error::ownership_violation(1, 2, 3);
        assert!(err.is_ownership_violation());
        assert!(!err.is_out_of_memory());
        match err.into_kind() {
            ErrorKind::OwnershipViolation {
                block,
                owner,
                requester,
            } => {
                assert_eq!((block, owner, requester), (1, 2, 3));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_borrow_kind_from_flag() {
        assert_eq!(BorrowKind::from_exclusive(true), BorrowKind::Exclusive);
        assert_eq!(BorrowKind::from_exclusive(false), BorrowKind::Shared);
        assert!(BorrowKind::Exclusive.is_exclusive());
        assert_eq!(BorrowKind::Shared.to_string(), "shared");
    }
}
