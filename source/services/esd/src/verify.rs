// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Signature chain verification and the `/sys/cert.sys` store.

use es_formats::{parse_cert_chain, CertReader, SignedBlobReader};
use ios_abi::paths::CERT_STORE;
use ios_abi::pid::PID_ES;
use ios_abi::{IpcResult, ReturnCode};
use iosc::{Handle, Iosc, ObjectGuard, ObjectSubType, ObjectType, HANDLE_ROOT_KEY};
use log::{debug, error};
use nand_fs::{FileSystem, FsError, Mode, Modes, SeekMode};

use crate::{KERNEL_GID, KERNEL_UID};

const CERT_STORE_MODES: Modes = Modes::new(Mode::ReadWrite, Mode::ReadWrite, Mode::Read);

/// What kind of blob is being verified; selects the required issuer prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyContainerType {
    /// Signed by a `CP` certificate.
    Tmd,
    /// Signed by an `XS` certificate.
    Ticket,
    /// Signed by an `MS` certificate.
    Device,
}

impl VerifyContainerType {
    fn issuer_prefix(self) -> &'static str {
        match self {
            Self::Tmd => "CP",
            Self::Ticket => "XS",
            Self::Device => "MS",
        }
    }
}

/// Whether a successful verification persists the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Append the issuer and CA certificates to the store.
    UpdateCertStore,
    /// Leave the store alone.
    DoNotUpdateCertStore,
}

/// Contents of the cert store.
pub fn read_cert_store(fs: &mut dyn FileSystem) -> IpcResult<Vec<u8>> {
    fs.read_file(KERNEL_UID, KERNEL_GID, CERT_STORE).map_err(|err| match err {
        FsError::ShortRead => ReturnCode::EsShortRead,
        other => other.into(),
    })
}

/// Appends `cert` unless a certificate with the same name is stored already.
pub fn write_new_cert_to_store(fs: &mut dyn FileSystem, cert: &CertReader) -> IpcResult<()> {
    if let Ok(store) = read_cert_store(fs) {
        if parse_cert_chain(&store).contains_key(&cert.name()) {
            return Ok(());
        }
    }
    let fd = fs
        .create_and_open_file(KERNEL_UID, KERNEL_GID, CERT_STORE, CERT_STORE_MODES)
        .map_err(|_| ReturnCode::EsIo)?;
    let result = fs.seek_file(fd, 0, SeekMode::End).and_then(|_| fs.write_bytes_to_file(fd, cert.bytes()));
    let closed = fs.close(fd);
    match (result, closed) {
        (Ok(written), Ok(())) if written as usize == cert.bytes().len() => {
            debug!("es: stored certificate {}", cert.name());
            Ok(())
        }
        _ => Err(ReturnCode::EsIo),
    }
}

/// Verifies `blob` against `cert_chain` and releases every handle it created.
pub fn verify_container(
    iosc: &mut dyn Iosc,
    fs: &mut dyn FileSystem,
    ty: VerifyContainerType,
    mode: VerifyMode,
    blob: &SignedBlobReader,
    cert_chain: &[u8],
) -> IpcResult<()> {
    let issuer = verify_container_with_issuer(iosc, fs, ty, mode, blob, cert_chain)?;
    iosc.delete_object(issuer, PID_ES)
}

/// Verifies `blob` against `cert_chain`.
///
/// On success the issuer public key handle belongs to the caller; every
/// other handle, and the issuer handle on failure, is deleted.
pub fn verify_container_with_issuer(
    iosc: &mut dyn Iosc,
    fs: &mut dyn FileSystem,
    ty: VerifyContainerType,
    mode: VerifyMode,
    blob: &SignedBlobReader,
    cert_chain: &[u8],
) -> IpcResult<Handle> {
    if !blob.is_signature_valid() {
        return Err(ReturnCode::EsInvalid);
    }

    // "Root-CA00000001-XS00000003" => root, CA, issuer
    let issuer = blob.issuer();
    let parents: Vec<&str> = issuer.split('-').collect();
    let [_, ca_name, issuer_name] = parents.as_slice() else {
        return Err(ReturnCode::EsInvalid);
    };

    let certs = parse_cert_chain(cert_chain);
    let (Some(issuer_cert), Some(ca_cert)) = (certs.get(*issuer_name), certs.get(*ca_name)) else {
        return Err(ReturnCode::EsUnknownIssuer);
    };
    if !issuer_cert.name().starts_with(ty.issuer_prefix()) {
        return Err(ReturnCode::EsInvalid);
    }

    let mut ca = ObjectGuard::create(iosc, ObjectType::PublicKey, ObjectSubType::Rsa2048, PID_ES)?;
    let ca_handle = ca.handle();
    ca.iosc().import_certificate(ca_cert.bytes(), HANDLE_ROOT_KEY, ca_handle, PID_ES).inspect_err(|err| {
        error!("es: importing CA certificate {ca_name} failed: {err}");
    })?;

    let subtype = match ty {
        VerifyContainerType::Device => ObjectSubType::Ecc233,
        _ => ObjectSubType::Rsa2048,
    };
    let mut issuer_key = ObjectGuard::create(ca.iosc(), ObjectType::PublicKey, subtype, PID_ES)?;
    let issuer_handle = issuer_key.handle();
    issuer_key
        .iosc()
        .import_certificate(issuer_cert.bytes(), ca_handle, issuer_handle, PID_ES)
        .inspect_err(|err| error!("es: importing issuer certificate {issuer_name} failed: {err}"))?;

    issuer_key
        .iosc()
        .verify_public_key_sign(&blob.sha1(), issuer_handle, blob.signature_data(), PID_ES)
        .inspect_err(|err| error!("es: signature check against {issuer_name} failed: {err}"))?;

    if mode == VerifyMode::UpdateCertStore {
        let issuer_written = write_new_cert_to_store(fs, issuer_cert)
            .inspect_err(|err| error!("es: writing issuer certificate failed: {err}"));
        let ca_written = write_new_cert_to_store(fs, ca_cert)
            .inspect_err(|err| error!("es: writing CA certificate failed: {err}"));
        issuer_written.and(ca_written)?;
    }

    Ok(issuer_key.release())
}

/// Verifies a certificate against `cert_chain` and imports it under `dest`.
pub fn verify_certificate(
    iosc: &mut dyn Iosc,
    fs: &mut dyn FileSystem,
    ty: VerifyContainerType,
    mode: VerifyMode,
    cert: &CertReader,
    cert_chain: &[u8],
    dest: Handle,
) -> IpcResult<()> {
    let issuer = verify_container_with_issuer(iosc, fs, ty, mode, cert.blob(), cert_chain)?;
    let imported = iosc.import_certificate(cert.bytes(), issuer, dest, PID_ES);
    let deleted = iosc.delete_object(issuer, PID_ES);
    imported.and(deleted)
}
