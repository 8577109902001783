// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Host fixtures for ES/FS integration tests
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Used by tests/es_host/tests
//!
//! PUBLIC API:
//!   - FakeIosc: handle table with a toy block cipher and echo signatures
//!   - RecordingHost: PpcHost that records reloads, bootstraps and alerts
//!   - TmdBuilder / TicketBuilder / cert_chain: signed fixture blobs
//!   - Harness: booted IOS over an in-memory NAND
//!
//! A blob counts as signed when the first 20 signature bytes hold the
//! SHA-1 of its signed region; `FakeIosc` checks exactly that.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use core_timing::Ticks;
use es_formats::{
    sha1_digest, CertReader, Content, SignatureType, CONTENT_RECORD_SIZE, TICKET_SIZE, TMD_HEADER_SIZE,
};
use esd::{EsReply, EsRequest, HangPpc, Ios, IosConfig, PpcHost};
use ios_abi::paths::{private_content_path, ticket_file_name, tmd_file_name, CERT_STORE};
use ios_abi::pid::{PID_ES, PID_PPCBOOT};
use ios_abi::{IpcResult, ReturnCode};
use iosc::{
    Handle, Iosc, ObjectSubType, ObjectType, HANDLE_COMMON_KEY, HANDLE_CONSOLE_KEY, HANDLE_NEW_COMMON_KEY,
    HANDLE_ROOT_KEY,
};
use nand_fs::{FileSystem, MemFileSystem, Modes};

/// Key behind `HANDLE_COMMON_KEY`.
pub const COMMON_KEY: [u8; 16] = [0x11; 16];
/// Key behind `HANDLE_NEW_COMMON_KEY`.
pub const NEW_COMMON_KEY: [u8; 16] = [0x22; 16];
/// Console private key behind `HANDLE_CONSOLE_KEY`.
pub const CONSOLE_KEY: [u8; 16] = [0x5c; 16];
/// Device id the fake reports.
pub const DEVICE_ID: u32 = 0x0403_ac68;

/// Issuer of fixture TMDs.
pub const TMD_ISSUER: &str = "Root-CA00000001-CP00000004";
/// Issuer of fixture tickets.
pub const TICKET_ISSUER: &str = "Root-CA00000001-XS00000003";

const FIRST_DYNAMIC_HANDLE: Handle = 0x20;
const MAX_OBJECTS: usize = 64;

/// Big-endian title id in the first half of an IV.
pub fn iv_from(id: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&id.to_be_bytes());
    iv
}

/// Toy CBC: the block cipher is XOR with the key. A trailing partial
/// block is XORed with the key only.
pub fn cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut prev = *iv;
    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
        let mut cipher = [0u8; 16];
        for i in 0..16 {
            cipher[i] = block[i] ^ prev[i] ^ key[i];
        }
        out.extend_from_slice(&cipher);
        prev = cipher;
    }
    out.extend(blocks.remainder().iter().zip(key).map(|(b, k)| b ^ k));
    out
}

/// Inverse of [`cbc_encrypt`].
pub fn cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut prev = *iv;
    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
        for i in 0..16 {
            out.push(block[i] ^ key[i] ^ prev[i]);
        }
        prev.copy_from_slice(block);
    }
    out.extend(blocks.remainder().iter().zip(key).map(|(b, k)| b ^ k));
    out
}

/// Key the fake derives from the console key and a server public key.
pub fn shared_key(server_public_key: &[u8]) -> [u8; 16] {
    let mut key = CONSOLE_KEY;
    for (k, p) in key.iter_mut().zip(server_public_key) {
        *k ^= p;
    }
    key
}

/// Writes the echo signature over the signed region.
pub fn sign(bytes: &mut [u8]) {
    let ty = SignatureType::Rsa2048;
    let digest = sha1_digest(&bytes[ty.issuer_offset()..]);
    bytes[4..24].copy_from_slice(&digest);
}

fn put(bytes: &mut [u8], offset: usize, value: &[u8]) {
    bytes[offset..offset + value.len()].copy_from_slice(value);
}

fn signed_header(size: usize, issuer: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; size];
    put(&mut bytes, 0, &SignatureType::Rsa2048.raw().to_be_bytes());
    put(&mut bytes, SignatureType::Rsa2048.issuer_offset(), issuer.as_bytes());
    bytes
}

/// RSA-2048 certificate named `name`, issued by `issuer`.
pub fn cert(issuer: &str, name: &str) -> Vec<u8> {
    let base = SignatureType::Rsa2048.issuer_offset();
    let mut bytes = signed_header(0x300, issuer);
    put(&mut bytes, base + 0x40, &1u32.to_be_bytes());
    put(&mut bytes, base + 0x44, name.as_bytes());
    put(&mut bytes, base + 0x88, &sha1_digest(name.as_bytes()));
    sign(&mut bytes);
    bytes
}

/// CA, TMD signer and ticket signer certificates.
pub fn cert_chain() -> Vec<u8> {
    let mut chain = cert("Root", "CA00000001");
    chain.extend(cert("Root-CA00000001", "CP00000004"));
    chain.extend(cert("Root-CA00000001", "XS00000003"));
    chain
}

#[derive(Debug, Clone)]
struct KeyObject {
    owner: u32,
    key: Vec<u8>,
}

#[derive(Debug)]
struct IoscState {
    objects: BTreeMap<Handle, KeyObject>,
    next: Handle,
    default_id: bool,
    reject_signatures: bool,
}

/// Crypto service double. Clones share one handle table so a test can
/// keep a handle on it after handing the service to [`Ios`].
///
/// PPC uids act as `PID_PPCBOOT`; ES may use any object.
#[derive(Debug, Clone)]
pub struct FakeIosc {
    state: Rc<RefCell<IoscState>>,
}

impl Default for FakeIosc {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIosc {
    /// Service with the console and common keys loaded.
    pub fn new() -> Self {
        let mut objects = BTreeMap::new();
        for (handle, key) in [
            (HANDLE_CONSOLE_KEY, CONSOLE_KEY),
            (HANDLE_COMMON_KEY, COMMON_KEY),
            (HANDLE_NEW_COMMON_KEY, NEW_COMMON_KEY),
        ] {
            objects.insert(handle, KeyObject { owner: u32::MAX, key: key.to_vec() });
        }
        objects.insert(HANDLE_ROOT_KEY, KeyObject { owner: u32::MAX, key: Vec::new() });
        let state = IoscState { objects, next: FIRST_DYNAMIC_HANDLE, default_id: false, reject_signatures: false };
        Self { state: Rc::new(RefCell::new(state)) }
    }

    /// Reports default device credentials from now on.
    pub fn set_default_id(&self, default_id: bool) {
        self.state.borrow_mut().default_id = default_id;
    }

    /// Fails every signature check from now on.
    pub fn reject_signatures(&self, reject: bool) {
        self.state.borrow_mut().reject_signatures = reject;
    }

    /// Objects created through the trait and not yet deleted.
    pub fn live_objects(&self) -> usize {
        let state = self.state.borrow();
        state.objects.keys().filter(|&&handle| handle >= FIRST_DYNAMIC_HANDLE && handle != HANDLE_ROOT_KEY).count()
    }

    /// Owner mask of a handle.
    pub fn owner_of(&self, handle: Handle) -> Option<u32> {
        self.state.borrow().objects.get(&handle).map(|object| object.owner)
    }

    /// Raw key stored in a handle.
    pub fn key_of(&self, handle: Handle) -> Option<Vec<u8>> {
        self.state.borrow().objects.get(&handle).map(|object| object.key.clone())
    }

    fn aes_key(&self, handle: Handle, pid: u32) -> IpcResult<[u8; 16]> {
        let state = self.state.borrow();
        let object = state.objects.get(&handle).ok_or(ReturnCode::IoscInvalid)?;
        let pid = if pid >= 32 { PID_PPCBOOT } else { pid };
        if pid != PID_ES && object.owner & (1 << pid) == 0 {
            return Err(ReturnCode::IoscAccessDenied);
        }
        object.key.get(..16).and_then(|key| key.try_into().ok()).ok_or(ReturnCode::IoscInvalidObjectType)
    }

    fn store(&self, handle: Handle, key: Vec<u8>) -> IpcResult<()> {
        let mut state = self.state.borrow_mut();
        let object = state.objects.get_mut(&handle).ok_or(ReturnCode::IoscInvalid)?;
        object.key = key;
        Ok(())
    }

    fn check_signature(&self, sha1: &[u8; 20], signer: Handle, signature: &[u8]) -> IpcResult<()> {
        let state = self.state.borrow();
        if !state.objects.contains_key(&signer) {
            return Err(ReturnCode::IoscInvalid);
        }
        if state.reject_signatures || signature.get(..20) != Some(&sha1[..]) {
            return Err(ReturnCode::IoscFailCheckValue);
        }
        Ok(())
    }
}

impl Iosc for FakeIosc {
    fn create_object(&mut self, _ty: ObjectType, _subtype: ObjectSubType, pid: u32) -> IpcResult<Handle> {
        let mut state = self.state.borrow_mut();
        if state.objects.len() >= MAX_OBJECTS {
            return Err(ReturnCode::IoscMax);
        }
        let handle = state.next;
        state.next += 1;
        state.objects.insert(handle, KeyObject { owner: 1 << pid, key: Vec::new() });
        Ok(handle)
    }

    fn delete_object(&mut self, handle: Handle, _pid: u32) -> IpcResult<()> {
        if handle < FIRST_DYNAMIC_HANDLE || handle == HANDLE_ROOT_KEY {
            return Err(ReturnCode::IoscAccessDenied);
        }
        self.state.borrow_mut().objects.remove(&handle).map(|_| ()).ok_or(ReturnCode::IoscInvalid)
    }

    fn import_secret_key(
        &mut self,
        dest: Handle,
        decrypt_handle: Handle,
        iv: &[u8; 16],
        encrypted_key: &[u8],
        pid: u32,
    ) -> IpcResult<()> {
        let wrapping = self.aes_key(decrypt_handle, pid)?;
        let encrypted = encrypted_key.get(..16).ok_or(ReturnCode::IoscInvalidSize)?;
        self.store(dest, cbc_decrypt(&wrapping, iv, encrypted))
    }

    fn import_public_key(&mut self, dest: Handle, public_key: &[u8], _exponent: Option<&[u8]>, _pid: u32) -> IpcResult<()> {
        self.store(dest, public_key.to_vec())
    }

    fn import_certificate(&mut self, cert: &[u8], signer: Handle, dest: Handle, _pid: u32) -> IpcResult<()> {
        let reader = CertReader::new(cert.to_vec());
        if !reader.is_valid() {
            return Err(ReturnCode::IoscInvalidFormat);
        }
        self.check_signature(&reader.blob().sha1(), signer, reader.blob().signature_data())?;
        self.store(dest, reader.public_key().to_vec())
    }

    fn compute_shared_key(&mut self, dest: Handle, private: Handle, public: Handle, _pid: u32) -> IpcResult<()> {
        let public_key = self.key_of(public).ok_or(ReturnCode::IoscInvalid)?;
        if private != HANDLE_CONSOLE_KEY {
            return Err(ReturnCode::IoscInvalid);
        }
        self.store(dest, shared_key(&public_key).to_vec())
    }

    fn encrypt(&mut self, key: Handle, iv: &[u8; 16], input: &[u8], pid: u32) -> IpcResult<Vec<u8>> {
        Ok(cbc_encrypt(&self.aes_key(key, pid)?, iv, input))
    }

    fn decrypt(&mut self, key: Handle, iv: &[u8; 16], input: &[u8], pid: u32) -> IpcResult<Vec<u8>> {
        Ok(cbc_decrypt(&self.aes_key(key, pid)?, iv, input))
    }

    fn verify_public_key_sign(&mut self, sha1: &[u8; 20], signer: Handle, signature: &[u8], _pid: u32) -> IpcResult<()> {
        self.check_signature(sha1, signer, signature)
    }

    fn set_ownership(&mut self, handle: Handle, new_owner: u32, _pid: u32) -> IpcResult<()> {
        let mut state = self.state.borrow_mut();
        let object = state.objects.get_mut(&handle).ok_or(ReturnCode::IoscInvalid)?;
        object.owner = new_owner;
        Ok(())
    }

    fn is_using_default_id(&self) -> bool {
        self.state.borrow().default_id
    }

    fn device_id(&self) -> u32 {
        DEVICE_ID
    }
}

/// What the host saw.
#[derive(Debug, Default)]
pub struct HostLog {
    /// `load_ios` calls.
    pub loads: Vec<(u64, HangPpc, Option<Vec<u8>>)>,
    /// Images the PPC was started on.
    pub bootstraps: Vec<Vec<u8>>,
    /// User-visible alerts.
    pub alerts: Vec<String>,
}

/// Host double; clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    log: Rc<RefCell<HostLog>>,
}

impl RecordingHost {
    /// Borrow of the log.
    pub fn log(&self) -> std::cell::Ref<'_, HostLog> {
        self.log.borrow()
    }
}

impl PpcHost for RecordingHost {
    fn load_ios(&mut self, title_id: u64, hang_ppc: HangPpc, image: Option<&[u8]>) -> bool {
        self.log.borrow_mut().loads.push((title_id, hang_ppc, image.map(<[u8]>::to_vec)));
        true
    }

    fn bootstrap_ppc(&mut self, dol: &[u8]) -> bool {
        self.log.borrow_mut().bootstraps.push(dol.to_vec());
        true
    }

    fn alert(&mut self, message: &str) {
        self.log.borrow_mut().alerts.push(message.to_owned());
    }
}

/// One content of a fixture title with its plaintext.
#[derive(Debug, Clone)]
pub struct FixtureContent {
    /// TMD record.
    pub record: Content,
    /// Decrypted payload.
    pub data: Vec<u8>,
}

impl FixtureContent {
    /// Content record matching `data`.
    pub fn new(id: u32, index: u16, ty: u16, data: &[u8]) -> Self {
        let record = Content { id, index, ty, size: data.len() as u64, sha1: sha1_digest(data) };
        Self { record, data: data.to_vec() }
    }
}

/// Signed TMD fixture.
#[derive(Debug, Clone)]
pub struct TmdBuilder {
    /// Title id.
    pub title_id: u64,
    /// IOS the title runs on.
    pub ios_id: u64,
    /// Title flags.
    pub title_flags: u32,
    /// Group id.
    pub group_id: u16,
    /// Boot content index.
    pub boot_index: u16,
    /// Contents in TMD order.
    pub contents: Vec<FixtureContent>,
}

impl TmdBuilder {
    /// PPC title on IOS58 with no contents.
    pub fn new(title_id: u64) -> Self {
        Self { title_id, ios_id: 0x0000_0001_0000_003a, title_flags: 1, group_id: 0x3031, boot_index: 0, contents: Vec::new() }
    }

    /// Adds a content.
    pub fn content(mut self, content: FixtureContent) -> Self {
        self.contents.push(content);
        self
    }

    /// Signed TMD bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut bytes = signed_header(TMD_HEADER_SIZE + self.contents.len() * CONTENT_RECORD_SIZE, TMD_ISSUER);
        put(&mut bytes, 0x184, &self.ios_id.to_be_bytes());
        put(&mut bytes, 0x18c, &self.title_id.to_be_bytes());
        put(&mut bytes, 0x194, &self.title_flags.to_be_bytes());
        put(&mut bytes, 0x198, &self.group_id.to_be_bytes());
        put(&mut bytes, 0x1de, &(self.contents.len() as u16).to_be_bytes());
        put(&mut bytes, 0x1e0, &self.boot_index.to_be_bytes());
        for (position, content) in self.contents.iter().enumerate() {
            put(&mut bytes, TMD_HEADER_SIZE + position * CONTENT_RECORD_SIZE, &content.record.to_bytes());
        }
        sign(&mut bytes);
        bytes
    }
}

/// Signed v0 ticket fixture.
#[derive(Debug, Clone)]
pub struct TicketBuilder {
    /// Ticket id.
    pub ticket_id: u64,
    /// Title id.
    pub title_id: u64,
    /// Plain title key.
    pub title_key: [u8; 16],
    /// 0 for common tickets.
    pub device_id: u32,
    /// Common key slot.
    pub common_key_index: u8,
    /// Permitted title mask.
    pub permitted_title_mask: u32,
    /// Permitted title id.
    pub permitted_title_id: u32,
    /// Export flags.
    pub export: u8,
    /// Server public key of a personalised ticket.
    pub server_public_key: [u8; 0x3c],
}

impl TicketBuilder {
    /// Common ticket usable by every title.
    pub fn new(title_id: u64, ticket_id: u64) -> Self {
        Self {
            ticket_id,
            title_id,
            title_key: [0xa5; 16],
            device_id: 0,
            common_key_index: 0,
            permitted_title_mask: 0,
            permitted_title_id: 0,
            export: 0,
            server_public_key: [0x33; 0x3c],
        }
    }

    /// Title key wrapped with the common key, as stored on the NAND.
    pub fn wrapped_title_key(&self) -> [u8; 16] {
        let common = if self.common_key_index == 1 { NEW_COMMON_KEY } else { COMMON_KEY };
        let mut out = [0u8; 16];
        out.copy_from_slice(&cbc_encrypt(&common, &iv_from(self.title_id), &self.title_key));
        out
    }

    /// Signed ticket bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut bytes = signed_header(TICKET_SIZE, TICKET_ISSUER);
        put(&mut bytes, 0x180, &self.server_public_key);
        let stored_key = if self.device_id == 0 {
            self.wrapped_title_key().to_vec()
        } else {
            cbc_encrypt(&shared_key(&self.server_public_key), &iv_from(self.ticket_id), &self.wrapped_title_key())
        };
        put(&mut bytes, 0x1bf, &stored_key);
        put(&mut bytes, 0x1d0, &self.ticket_id.to_be_bytes());
        put(&mut bytes, 0x1d8, &self.device_id.to_be_bytes());
        put(&mut bytes, 0x1dc, &self.title_id.to_be_bytes());
        put(&mut bytes, 0x1e8, &self.permitted_title_mask.to_be_bytes());
        put(&mut bytes, 0x1ec, &self.permitted_title_id.to_be_bytes());
        bytes[0x1f0] = self.export;
        bytes[0x1f1] = self.common_key_index;
        bytes[0x222..0x262].fill(0xff);
        sign(&mut bytes);
        bytes
    }
}

/// Writes `data` at `path` as the kernel, creating parent directories.
pub fn write_nand_file(fs: &mut dyn FileSystem, path: &str, data: &[u8]) {
    fs.create_full_path(0, 0, path, 0, Modes::public()).expect("create parents");
    fs.write_file(0, 0, path, data, Modes::public()).expect("write file");
}

/// Installs the certificate store.
pub fn install_cert_store(fs: &mut dyn FileSystem) {
    write_nand_file(fs, CERT_STORE, &cert_chain());
}

/// Installs a title the way a finished import leaves it: TMD, private
/// contents and ticket.
pub fn install_title(fs: &mut dyn FileSystem, tmd: &TmdBuilder, ticket: &TicketBuilder) {
    write_nand_file(fs, &tmd_file_name(tmd.title_id), &tmd.build());
    for content in tmd.contents.iter().filter(|content| !content.record.is_shared()) {
        write_nand_file(fs, &private_content_path(tmd.title_id, content.record.id), &content.data);
    }
    write_nand_file(fs, &ticket_file_name(ticket.title_id), &ticket.build());
}

/// Booted IOS with its doubles.
pub struct Harness {
    /// The driver.
    pub ios: Ios,
    /// Probe into the crypto service.
    pub iosc: FakeIosc,
    /// Recording view of the host.
    pub host: RecordingHost,
}

impl Harness {
    /// Boots IOS58 over `nand` with continuations run inline.
    pub fn boot(nand: MemFileSystem) -> Self {
        let mut config = IosConfig::default();
        config.ios.core_running = false;
        Self::boot_with(nand, config, FakeIosc::new())
    }

    /// Boots with an explicit configuration and crypto service.
    pub fn boot_with(nand: MemFileSystem, config: IosConfig, iosc: FakeIosc) -> Self {
        let host = RecordingHost::default();
        let ios = Ios::new(config, Box::new(nand), Box::new(iosc.clone()), Box::new(host.clone()));
        Self { ios, iosc, host }
    }

    /// Opens `/dev/es` for `uid` under `fd`.
    pub fn open_es(&mut self, fd: u32, uid: u32) {
        self.ios.open_es(uid, 0, fd).expect("open es");
    }

    /// Issues an ioctlv, discarding the tick cost.
    pub fn es(&mut self, fd: u32, request: EsRequest<'_>) -> IpcResult<EsReply> {
        let mut ticks = Ticks::new();
        self.ios.ioctlv(fd, request, &mut ticks)
    }

    /// Reads a NAND file as the kernel.
    pub fn nand_file(&mut self, path: &str) -> Option<Vec<u8>> {
        self.ios.kernel_mut().fs_mut().backend_mut().read_file(0, 0, path).ok()
    }

    /// Whether a NAND path exists.
    pub fn nand_exists(&self, path: &str) -> bool {
        self.ios.kernel().fs().backend().get_metadata(0, 0, path).is_ok()
    }
}
