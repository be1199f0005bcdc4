use std::fmt;

/// Result codes returned by the file transport clients.
///
/// The numeric values are part of the transport interface and appear in log
/// lines next to the human-readable string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TransferCode {
    Success = 0,
    /// Generic transport error.
    Error = 1,
    Timeout = 2,
    SocketError = 3,
    ConnLost = 4,
    /// Content hash mismatch during a hashed transfer; worth a bounded retry.
    Hash = 5,
    /// Internal error in the transport.
    IntError = 6,
    /// The base directory of the share vanished on the client (e.g. a
    /// snapshot was deleted under us).
    BaseDirLost = 7,
    /// The client reported structured error codes; fetch them via
    /// `ChunkedTransfer::remote_error`.
    ErrorCodes = 8,
}

impl TransferCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn is_success(self) -> bool {
        self == TransferCode::Success
    }

    /// Whether a failed full transfer may keep its partially downloaded
    /// bytes (the connection died mid-body rather than before it).
    pub fn partial_after_full_transfer(self) -> bool {
        matches!(self, TransferCode::Timeout | TransferCode::Error)
    }

    /// Whether a failed patch transfer may keep its partially patched bytes.
    pub fn partial_after_patch_transfer(self) -> bool {
        matches!(
            self,
            TransferCode::Timeout | TransferCode::ConnLost | TransferCode::SocketError
        )
    }

    /// Whether a full-transfer failure means the client is unreachable and
    /// the engine should stop attempting transfers.
    pub fn offline_after_full_transfer(self) -> bool {
        matches!(
            self,
            TransferCode::Timeout | TransferCode::Error | TransferCode::BaseDirLost
        )
    }

    /// Whether a patch-transfer failure takes the transport offline.
    pub fn offline_after_patch_transfer(self) -> bool {
        matches!(
            self,
            TransferCode::Timeout
                | TransferCode::Error
                | TransferCode::SocketError
                | TransferCode::IntError
                | TransferCode::BaseDirLost
                | TransferCode::ConnLost
        )
    }
}

impl fmt::Display for TransferCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferCode::Success => "success",
            TransferCode::Error => "error",
            TransferCode::Timeout => "timeout",
            TransferCode::SocketError => "socket error",
            TransferCode::ConnLost => "connection lost",
            TransferCode::Hash => "hash mismatch",
            TransferCode::IntError => "internal error",
            TransferCode::BaseDirLost => "base directory lost",
            TransferCode::ErrorCodes => "remote error codes",
        };
        f.write_str(s)
    }
}
