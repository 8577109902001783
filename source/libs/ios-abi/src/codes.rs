// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Return codes visible to emulated software.

use thiserror::Error;

/// Result alias for operations that report through the IPC error space.
pub type IpcResult<T> = core::result::Result<T, ReturnCode>;

/// Negative IPC return values.
///
/// Success is not a variant; it is the `Ok` side of [`IpcResult`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ReturnCode {
    /// Generic permission failure.
    #[error("IPC_EACCES")]
    AccessDenied = -1,
    /// Object already exists.
    #[error("IPC_EEXIST")]
    Exists = -2,
    /// Invalid argument.
    #[error("IPC_EINVAL")]
    Invalid = -4,
    /// Too many open handles.
    #[error("IPC_EMAX")]
    Max = -5,
    /// Object not found.
    #[error("IPC_ENOENT")]
    NotFound = -6,
    /// Request queue is full.
    #[error("IPC_EQUEUEFULL")]
    QueueFull = -8,
    /// Generic I/O failure.
    #[error("IPC_EIO")]
    Io = -12,
    /// Out of memory.
    #[error("IPC_ENOMEM")]
    NoMemory = -22,

    /// FS: invalid argument.
    #[error("FS_EINVAL")]
    FsInvalid = -101,
    /// FS: permission denied.
    #[error("FS_EACCESS")]
    FsAccessDenied = -102,
    /// FS: superblock write failed.
    #[error("FS_ECORRUPT")]
    FsSuperblockWriteFailed = -103,
    /// FS: superblock init failed.
    #[error("FS_ESUPERBLOCKINIT")]
    FsSuperblockInitFailed = -104,
    /// FS: entry already exists.
    #[error("FS_EEXIST")]
    FsAlreadyExists = -105,
    /// FS: entry not found.
    #[error("FS_ENOENT")]
    FsNotFound = -106,
    /// FS: file system table full.
    #[error("FS_ENFILE")]
    FsFstFull = -107,
    /// FS: no free space.
    #[error("FS_EFBIG")]
    FsNoFreeSpace = -108,
    /// FS: no free file descriptor.
    #[error("FS_EFDEXHAUSTED")]
    FsNoFreeHandle = -109,
    /// FS: path has too many components.
    #[error("FS_ENAMELEN")]
    FsTooManyPathComponents = -110,
    /// FS: entry is in use.
    #[error("FS_EBUSY")]
    FsInUse = -111,
    /// FS: bad block.
    #[error("FS_EBADBLOCK")]
    FsBadBlock = -112,
    /// FS: correctable ECC error.
    #[error("FS_EECC")]
    FsEccError = -113,
    /// FS: uncorrectable ECC error.
    #[error("FS_EECC_CRIT")]
    FsCriticalEccError = -114,
    /// FS: directory not empty.
    #[error("FS_ENOTEMPTY")]
    FsFileNotEmpty = -115,
    /// FS: HMAC check failed.
    #[error("FS_EHMAC")]
    FsCheckFailed = -116,
    /// FS: unknown failure.
    #[error("FS_EUNKNOWN")]
    FsUnknownError = -117,
    /// FS: short read.
    #[error("FS_ESHORTREAD")]
    FsShortRead = -118,

    /// ES: short read.
    #[error("ES_SHORT_READ")]
    EsShortRead = -1009,
    /// ES: I/O failure.
    #[error("ES_EIO")]
    EsIo = -1010,
    /// ES: TMD uses an unsupported signature type.
    #[error("ES_INVALID_TMD_SIGNATURE_TYPE")]
    EsInvalidTmdSignatureType = -1012,
    /// ES: no free ES context.
    #[error("ES_FD_EXHAUSTED")]
    EsFdExhausted = -1016,
    /// ES: invalid argument.
    #[error("ES_EINVAL")]
    EsInvalid = -1017,
    /// ES: ticket is personalised for another console.
    #[error("ES_DEVICE_ID_MISMATCH")]
    EsDeviceIdMismatch = -1020,
    /// ES: content hash does not match the TMD.
    #[error("ES_HASH_MISMATCH")]
    EsHashMismatch = -1022,
    /// ES: out of memory.
    #[error("ES_ENOMEM")]
    EsNoMemory = -1024,
    /// ES: permission denied.
    #[error("ES_EACCES")]
    EsAccessDenied = -1026,
    /// ES: issuer certificate not found.
    #[error("ES_UNKNOWN_ISSUER")]
    EsUnknownIssuer = -1027,
    /// ES: no ticket installed.
    #[error("ES_NO_TICKET")]
    EsNoTicket = -1028,
    /// ES: ticket is invalid.
    #[error("ES_INVALID_TICKET")]
    EsInvalidTicket = -1029,

    /// IOSC: permission denied.
    #[error("IOSC_EACCES")]
    IoscAccessDenied = -2000,
    /// IOSC: object already exists.
    #[error("IOSC_EEXIST")]
    IoscExists = -2001,
    /// IOSC: invalid argument.
    #[error("IOSC_EINVAL")]
    IoscInvalid = -2002,
    /// IOSC: object table full.
    #[error("IOSC_EMAX")]
    IoscMax = -2003,
    /// IOSC: object not found.
    #[error("IOSC_ENOENT")]
    IoscNotFound = -2004,
    /// IOSC: wrong object type.
    #[error("IOSC_INVALID_OBJTYPE")]
    IoscInvalidObjectType = -2005,
    /// IOSC: invalid RNG state.
    #[error("IOSC_INVALID_RNG")]
    IoscInvalidRng = -2006,
    /// IOSC: invalid flag.
    #[error("IOSC_INVALID_FLAG")]
    IoscInvalidFlag = -2007,
    /// IOSC: invalid format.
    #[error("IOSC_INVALID_FORMAT")]
    IoscInvalidFormat = -2008,
    /// IOSC: invalid version.
    #[error("IOSC_INVALID_VERSION")]
    IoscInvalidVersion = -2009,
    /// IOSC: signer does not match.
    #[error("IOSC_INVALID_SIGNER")]
    IoscInvalidSigner = -2010,
    /// IOSC: signature check failed.
    #[error("IOSC_FAIL_CHECKVALUE")]
    IoscFailCheckValue = -2011,
    /// IOSC: internal failure.
    #[error("IOSC_FAIL_INTERNAL")]
    IoscFailInternal = -2012,
    /// IOSC: allocation failure.
    #[error("IOSC_FAIL_ALLOC")]
    IoscFailAlloc = -2013,
    /// IOSC: invalid size.
    #[error("IOSC_INVALID_SIZE")]
    IoscInvalidSize = -2014,
    /// IOSC: invalid address.
    #[error("IOSC_INVALID_ADDR")]
    IoscInvalidAddr = -2015,
    /// IOSC: invalid alignment.
    #[error("IOSC_INVALID_ALIGN")]
    IoscInvalidAlign = -2016,
}

const ALL: [ReturnCode; 55] = [
    ReturnCode::AccessDenied,
    ReturnCode::Exists,
    ReturnCode::Invalid,
    ReturnCode::Max,
    ReturnCode::NotFound,
    ReturnCode::QueueFull,
    ReturnCode::Io,
    ReturnCode::NoMemory,
    ReturnCode::FsInvalid,
    ReturnCode::FsAccessDenied,
    ReturnCode::FsSuperblockWriteFailed,
    ReturnCode::FsSuperblockInitFailed,
    ReturnCode::FsAlreadyExists,
    ReturnCode::FsNotFound,
    ReturnCode::FsFstFull,
    ReturnCode::FsNoFreeSpace,
    ReturnCode::FsNoFreeHandle,
    ReturnCode::FsTooManyPathComponents,
    ReturnCode::FsInUse,
    ReturnCode::FsBadBlock,
    ReturnCode::FsEccError,
    ReturnCode::FsCriticalEccError,
    ReturnCode::FsFileNotEmpty,
    ReturnCode::FsCheckFailed,
    ReturnCode::FsUnknownError,
    ReturnCode::FsShortRead,
    ReturnCode::EsShortRead,
    ReturnCode::EsIo,
    ReturnCode::EsInvalidTmdSignatureType,
    ReturnCode::EsFdExhausted,
    ReturnCode::EsInvalid,
    ReturnCode::EsDeviceIdMismatch,
    ReturnCode::EsHashMismatch,
    ReturnCode::EsNoMemory,
    ReturnCode::EsAccessDenied,
    ReturnCode::EsUnknownIssuer,
    ReturnCode::EsNoTicket,
    ReturnCode::EsInvalidTicket,
    ReturnCode::IoscAccessDenied,
    ReturnCode::IoscExists,
    ReturnCode::IoscInvalid,
    ReturnCode::IoscMax,
    ReturnCode::IoscNotFound,
    ReturnCode::IoscInvalidObjectType,
    ReturnCode::IoscInvalidRng,
    ReturnCode::IoscInvalidFlag,
    ReturnCode::IoscInvalidFormat,
    ReturnCode::IoscInvalidVersion,
    ReturnCode::IoscInvalidSigner,
    ReturnCode::IoscFailCheckValue,
    ReturnCode::IoscFailInternal,
    ReturnCode::IoscFailAlloc,
    ReturnCode::IoscInvalidSize,
    ReturnCode::IoscInvalidAddr,
    ReturnCode::IoscInvalidAlign,
];

impl ReturnCode {
    /// Raw value written into the IPC reply.
    pub const fn raw(self) -> i32 {
        self as i32
    }

    /// Decodes a raw negative reply value.
    pub fn from_raw(raw: i32) -> Option<Self> {
        ALL.iter().copied().find(|code| code.raw() == raw)
    }
}

/// Collapses a result into the raw reply value (`0` on success).
pub fn to_raw<T>(result: &IpcResult<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(code) => code.raw(),
    }
}
