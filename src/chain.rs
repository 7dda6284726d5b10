use std::error::Error;
use std::fmt::{Display, Formatter};
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

#[derive(Debug)]
pub enum ChainError {
    /// A chain needs at least a leaf and an issuer to be verifiable.
    TooShort(usize),
    Malformed(String),
    /// No verified path from the leaf to the trust anchor.
    Untrusted(String),
    /// The leaf is outside its validity window.
    NotValid(String),
    HostnameMismatch { hostname: String, subject: String },
}

impl Display for ChainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::TooShort(len) => {
                write!(f, "not enough certificates in chain: {len}")
            }
            ChainError::Malformed(msg) => write!(f, "chain certificate does not parse: {msg}"),
            ChainError::Untrusted(msg) => write!(f, "unable to verify certificate chain: {msg}"),
            ChainError::NotValid(msg) => {
                write!(f, "certificate outside its validity period: {msg}")
            }
            ChainError::HostnameMismatch { hostname, subject } => {
                write!(f, "certificate {subject} is not valid for {hostname}")
            }
        }
    }
}

impl Error for ChainError {}

/// Verifies a leaf-first DER chain against a trust pool built from the chain
/// itself. The pool holds only the final certificate (a self-signed root is
/// presumed); chains of three or more supply `chain[1..len-2]` as
/// intermediates, so the certificate directly beneath the root belongs to
/// neither pool and a three-certificate chain has no usable intermediates.
/// The leaf must chain to the root through the intermediate pool, every
/// certificate on that path must be within its validity window, and the
/// leaf must be valid for `hostname`.
pub fn validate_chain(hostname: &str, chain: &[Vec<u8>]) -> Result<(), ChainError> {
    validate_chain_at(hostname, chain, OffsetDateTime::now_utc())
}

pub fn validate_chain_at(
    hostname: &str,
    chain: &[Vec<u8>],
    now: OffsetDateTime,
) -> Result<(), ChainError> {
    if chain.len() < 2 {
        return Err(ChainError::TooShort(chain.len()));
    }
    let mut parsed = Vec::with_capacity(chain.len());
    for der in chain {
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|e| ChainError::Malformed(e.to_string()))?;
        parsed.push(cert);
    }

    let leaf = &parsed[0];
    let not_before = leaf.validity.not_before.to_datetime();
    let not_after = leaf.validity.not_after.to_datetime();
    if now < not_before || now > not_after {
        return Err(ChainError::NotValid(format!(
            "leaf certificate {} is only valid from {not_before} to {not_after}",
            leaf.subject
        )));
    }

    let root = &parsed[parsed.len() - 1];
    let intermediates: &[X509Certificate] = if parsed.len() >= 3 {
        &parsed[1..parsed.len() - 2]
    } else {
        &[]
    };
    if !chains_to_root(leaf, intermediates, std::slice::from_ref(root), now, 0) {
        return Err(ChainError::Untrusted(format!(
            "no verified path from {} to trust anchor {}",
            leaf.subject, root.subject
        )));
    }

    if !leaf_matches_hostname(leaf, hostname) {
        return Err(ChainError::HostnameMismatch {
            hostname: hostname.to_string(),
            subject: leaf.subject.to_string(),
        });
    }
    Ok(())
}

/// Path search from `cert` to a pool root: a certificate chains to the root
/// either directly or through an intermediate that itself chains to the
/// root. The trust anchor's own signature is never checked, exactly like a
/// root pulled from a trust store. `depth` bounds the walk so self-signed
/// intermediates cannot loop.
fn chains_to_root(
    cert: &X509Certificate,
    intermediates: &[X509Certificate],
    roots: &[X509Certificate],
    now: OffsetDateTime,
    depth: usize,
) -> bool {
    for root in roots {
        if within_validity(root, now) && cert.verify_signature(Some(root.public_key())).is_ok() {
            return true;
        }
    }
    if depth >= intermediates.len() {
        return false;
    }
    intermediates.iter().any(|intermediate| {
        within_validity(intermediate, now)
            && cert.verify_signature(Some(intermediate.public_key())).is_ok()
            && chains_to_root(intermediate, intermediates, roots, now, depth + 1)
    })
}

fn within_validity(cert: &X509Certificate, now: OffsetDateTime) -> bool {
    let not_before = cert.validity.not_before.to_datetime();
    let not_after = cert.validity.not_after.to_datetime();
    now >= not_before && now <= not_after
}

fn leaf_matches_hostname(leaf: &X509Certificate, hostname: &str) -> bool {
    let hostname = hostname.to_ascii_lowercase();
    let mut names = Vec::new();
    for extension in leaf.extensions() {
        if let x509_parser::extensions::ParsedExtension::SubjectAlternativeName(san) =
            extension.parsed_extension()
        {
            for general_name in &san.general_names {
                if let x509_parser::extensions::GeneralName::DNSName(dns_name) = general_name {
                    names.push((*dns_name).to_string());
                }
            }
        }
    }
    if names.is_empty() {
        // legacy certificates without a SAN fall back to the subject CN
        if let Some(cn) = leaf
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
        {
            names.push(cn.to_string());
        }
    }
    names
        .iter()
        .any(|name| dns_name_matches(&name.to_ascii_lowercase(), &hostname))
}

fn dns_name_matches(pattern: &str, hostname: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        hostname
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix)
    } else {
        pattern == hostname
    }
}
