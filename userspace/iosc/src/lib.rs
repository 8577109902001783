// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Contract of the IOS crypto service (IOSC)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests for handle guards; fake service in tests/es_host
//!
//! PUBLIC API:
//!   - Iosc: opaque key-object operations keyed by handles
//!   - ObjectGuard: deletes a created object on drop unless released
//!
//! DEPENDENCIES:
//!   - ios-abi: IpcResult / ReturnCode
//!   - log: guard cleanup failures
//!
//! The primitives themselves live behind the trait; nothing in this crate
//! implements a cipher.

use ios_abi::IpcResult;
use log::warn;

/// Key object handle.
pub type Handle = u32;

/// Console ECC private key.
pub const HANDLE_CONSOLE_KEY: Handle = 0;
/// Console id.
pub const HANDLE_CONSOLE_ID: Handle = 1;
/// NAND FS key.
pub const HANDLE_FS_KEY: Handle = 2;
/// NAND FS HMAC key.
pub const HANDLE_FS_MAC: Handle = 3;
/// Common key.
pub const HANDLE_COMMON_KEY: Handle = 4;
/// PRNG key.
pub const HANDLE_PRNG_KEY: Handle = 5;
/// SD card key.
pub const HANDLE_SD_KEY: Handle = 6;
/// boot2 version.
pub const HANDLE_BOOT2_VERSION: Handle = 7;
/// NAND FS version.
pub const HANDLE_FS_VERSION: Handle = 10;
/// Korean common key.
pub const HANDLE_NEW_COMMON_KEY: Handle = 11;
/// Root public key.
pub const HANDLE_ROOT_KEY: Handle = 0x0fff_ffff;

/// Common keys addressable by a ticket's common key index.
pub const COMMON_KEY_HANDLES: [Handle; 2] = [HANDLE_COMMON_KEY, HANDLE_NEW_COMMON_KEY];

/// Object class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Symmetric or private key.
    SecretKey,
    /// Public key.
    PublicKey,
    /// Opaque data blob.
    Data,
}

/// Object subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectSubType {
    /// AES-128 key.
    Aes128,
    /// HMAC key.
    Mac,
    /// RSA-2048 key.
    Rsa2048,
    /// RSA-4096 key.
    Rsa4096,
    /// ECC-233 key.
    Ecc233,
    /// Data blob.
    Data,
    /// Version counter.
    Version,
}

/// Operations of the crypto service.
///
/// `pid` is the calling process; the service checks object ownership
/// against it.
pub trait Iosc {
    /// Allocates an empty object.
    fn create_object(&mut self, ty: ObjectType, subtype: ObjectSubType, pid: u32) -> IpcResult<Handle>;

    /// Frees an object.
    fn delete_object(&mut self, handle: Handle, pid: u32) -> IpcResult<()>;

    /// Decrypts `encrypted_key` with `decrypt_handle` and stores it in `dest`.
    fn import_secret_key(
        &mut self,
        dest: Handle,
        decrypt_handle: Handle,
        iv: &[u8; 16],
        encrypted_key: &[u8],
        pid: u32,
    ) -> IpcResult<()>;

    /// Stores a raw public key (and optional exponent) in `dest`.
    fn import_public_key(
        &mut self,
        dest: Handle,
        public_key: &[u8],
        exponent: Option<&[u8]>,
        pid: u32,
    ) -> IpcResult<()>;

    /// Verifies `cert` with `signer` and stores its public key in `dest`.
    fn import_certificate(&mut self, cert: &[u8], signer: Handle, dest: Handle, pid: u32)
        -> IpcResult<()>;

    /// Derives a shared key from `private` and `public` into `dest`.
    fn compute_shared_key(
        &mut self,
        dest: Handle,
        private: Handle,
        public: Handle,
        pid: u32,
    ) -> IpcResult<()>;

    /// AES-CBC encrypts `input`.
    fn encrypt(&mut self, key: Handle, iv: &[u8; 16], input: &[u8], pid: u32)
        -> IpcResult<Vec<u8>>;

    /// AES-CBC decrypts `input`.
    fn decrypt(&mut self, key: Handle, iv: &[u8; 16], input: &[u8], pid: u32)
        -> IpcResult<Vec<u8>>;

    /// Checks `signature` over `sha1` with the public key in `signer`.
    fn verify_public_key_sign(
        &mut self,
        sha1: &[u8; 20],
        signer: Handle,
        signature: &[u8],
        pid: u32,
    ) -> IpcResult<()>;

    /// Replaces the owner mask of `handle` (bit `n` grants pid `n`).
    fn set_ownership(&mut self, handle: Handle, new_owner: u32, pid: u32) -> IpcResult<()>;

    /// Whether the console runs with the shared default device credentials.
    fn is_using_default_id(&self) -> bool;

    /// Console device id.
    fn device_id(&self) -> u32;
}

/// Owns a freshly created object and deletes it when dropped.
///
/// [`ObjectGuard::release`] hands the handle to the caller instead.
pub struct ObjectGuard<'a, I: Iosc + ?Sized> {
    iosc: &'a mut I,
    handle: Handle,
    pid: u32,
    armed: bool,
}

impl<'a, I: Iosc + ?Sized> ObjectGuard<'a, I> {
    /// Creates an object and guards it.
    pub fn create(
        iosc: &'a mut I,
        ty: ObjectType,
        subtype: ObjectSubType,
        pid: u32,
    ) -> IpcResult<Self> {
        let handle = iosc.create_object(ty, subtype, pid)?;
        Ok(Self { iosc, handle, pid, armed: true })
    }

    /// Guarded handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Service the guard borrows from.
    pub fn iosc(&mut self) -> &mut I {
        self.iosc
    }

    /// Transfers ownership of the handle to the caller.
    pub fn release(mut self) -> Handle {
        self.armed = false;
        self.handle
    }
}

impl<I: Iosc + ?Sized> Drop for ObjectGuard<'_, I> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.iosc.delete_object(self.handle, self.pid) {
            warn!("iosc: failed to delete guarded handle {}: {err}", self.handle);
        }
    }
}
