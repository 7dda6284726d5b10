//! Helpers shared by the unit tests: deterministic RSA keys (generation is
//! expensive, so a small pool is generated once per process) and self-signed
//! certificate factories.

use crate::bundle::CertificateBundle;
use crate::crypto::keys::RsaKeyPair;
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, SerialNumber};
use std::sync::OnceLock;
use time::OffsetDateTime;

const KEY_POOL_SIZE: usize = 3;

pub(crate) fn test_keypair(slot: usize) -> RsaKeyPair {
    static POOL: OnceLock<Vec<RsaKeyPair>> = OnceLock::new();
    let pool = POOL.get_or_init(|| {
        (0..KEY_POOL_SIZE)
            .map(|_| RsaKeyPair::generate().expect("test key generation"))
            .collect()
    });
    pool[slot % KEY_POOL_SIZE].clone()
}

fn leaf_params(
    hostname: &str,
    serial: u64,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> CertificateParams {
    let mut params =
        CertificateParams::new(vec![hostname.to_string()]).expect("certificate params");
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, hostname);
    params.distinguished_name = dn;
    params.serial_number = Some(SerialNumber::from(serial_bytes(serial)));
    params.not_before = not_before;
    params.not_after = not_after;
    params
}

fn ca_params(
    name: &str,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("certificate params");
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.not_before = not_before;
    params.not_after = not_after;
    params
}

// DER integers carry no leading zero bytes
fn serial_bytes(serial: u64) -> Vec<u8> {
    let bytes = serial.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    bytes[start..].to_vec()
}

/// A self-signed single-certificate bundle for `hostname`.
pub(crate) fn generate_bundle(
    hostname: &str,
    serial: u64,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> CertificateBundle {
    let keypair = test_keypair(0);
    let signing_key = keypair.to_rcgen_keypair().expect("rcgen key");
    let mut params = leaf_params(hostname, serial, not_before, not_after);
    // self-signed certificates double as their own issuer
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let cert = params.self_signed(&signing_key).expect("self-signed certificate");
    CertificateBundle::new(keypair, vec![cert.der().as_ref().to_vec()]).expect("bundle")
}

/// A two-certificate chain (leaf signed directly by a self-signed root) for
/// `hostname`, returned with the leaf's private key.
pub(crate) fn generate_issued_chain(
    hostname: &str,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> (RsaKeyPair, Vec<Vec<u8>>) {
    let leaf_key = test_keypair(0);
    let root_key = test_keypair(2);
    let leaf_signer = leaf_key.to_rcgen_keypair().expect("rcgen key");
    let root_signer = root_key.to_rcgen_keypair().expect("rcgen key");

    let root_cert = ca_params("certsteward test root", not_before, not_after)
        .self_signed(&root_signer)
        .expect("root certificate");
    let leaf_cert = leaf_params(hostname, 1, not_before, not_after)
        .signed_by(&leaf_signer, &root_cert, &root_signer)
        .expect("leaf certificate");

    (
        leaf_key,
        vec![
            leaf_cert.der().as_ref().to_vec(),
            root_cert.der().as_ref().to_vec(),
        ],
    )
}

/// A four-certificate chain [leaf, intermediate, filler, root]: the leaf is
/// issued by the intermediate, the intermediate by the root, and the filler
/// is an unrelated self-signed certificate.
pub(crate) fn generate_padded_chain(
    hostname: &str,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Vec<Vec<u8>> {
    let leaf_key = test_keypair(0);
    let intermediate_key = test_keypair(1);
    let root_key = test_keypair(2);
    let leaf_signer = leaf_key.to_rcgen_keypair().expect("rcgen key");
    let intermediate_signer = intermediate_key.to_rcgen_keypair().expect("rcgen key");
    let root_signer = root_key.to_rcgen_keypair().expect("rcgen key");

    let root_cert = ca_params("certsteward test root", not_before, not_after)
        .self_signed(&root_signer)
        .expect("root certificate");
    let intermediate_cert = ca_params("certsteward test intermediate", not_before, not_after)
        .signed_by(&intermediate_signer, &root_cert, &root_signer)
        .expect("intermediate certificate");
    let leaf_cert = leaf_params(hostname, 1, not_before, not_after)
        .signed_by(&leaf_signer, &intermediate_cert, &intermediate_signer)
        .expect("leaf certificate");
    let filler_cert = ca_params("certsteward test filler", not_before, not_after)
        .self_signed(&leaf_signer)
        .expect("filler certificate");

    vec![
        leaf_cert.der().as_ref().to_vec(),
        intermediate_cert.der().as_ref().to_vec(),
        filler_cert.der().as_ref().to_vec(),
        root_cert.der().as_ref().to_vec(),
    ]
}

/// A leaf-first three-certificate chain (leaf, intermediate, root) for
/// `hostname`, returned with the leaf's private key.
pub(crate) fn generate_chain(
    hostname: &str,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> (RsaKeyPair, Vec<Vec<u8>>) {
    let leaf_key = test_keypair(0);
    let intermediate_key = test_keypair(1);
    let root_key = test_keypair(2);
    let leaf_signer = leaf_key.to_rcgen_keypair().expect("rcgen key");
    let intermediate_signer = intermediate_key.to_rcgen_keypair().expect("rcgen key");
    let root_signer = root_key.to_rcgen_keypair().expect("rcgen key");

    let root_cert = ca_params("certsteward test root", not_before, not_after)
        .self_signed(&root_signer)
        .expect("root certificate");
    let intermediate_cert = ca_params("certsteward test intermediate", not_before, not_after)
        .signed_by(&intermediate_signer, &root_cert, &root_signer)
        .expect("intermediate certificate");
    let leaf_cert = leaf_params(hostname, 1, not_before, not_after)
        .signed_by(&leaf_signer, &intermediate_cert, &intermediate_signer)
        .expect("leaf certificate");

    (
        leaf_key,
        vec![
            leaf_cert.der().as_ref().to_vec(),
            intermediate_cert.der().as_ref().to_vec(),
            root_cert.der().as_ref().to_vec(),
        ],
    )
}
