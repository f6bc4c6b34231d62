//! PEM/DER helpers shared by the parser, validator and TLS setup.

use bytes::Bytes;
use rustls_pemfile::Item;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::io::{self, Cursor};

const BEGIN_MARKER: &[u8] = b"-----BEGIN ";

/// Kind of a PEM block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Certificate,
    PrivateKey,
    Other,
}

/// A PEM block sliced out of its original buffer
#[derive(Debug, Clone)]
pub(crate) struct PemBlock {
    pub kind: BlockKind,
    pub bytes: Bytes,
}

/// Whether `data` contains PEM armor
pub(crate) fn is_pem(data: &[u8]) -> bool {
    find(data, BEGIN_MARKER).is_some()
}

/// Split a PEM buffer into its blocks, keeping each block's original text.
pub(crate) fn blocks(data: &Bytes) -> io::Result<Vec<PemBlock>> {
    let mut reader = Cursor::new(&data[..]);
    let mut out = Vec::new();

    loop {
        let start = reader.position() as usize;
        let item = match rustls_pemfile::read_one(&mut reader)? {
            Some(item) => item,
            None => break,
        };
        let end = reader.position() as usize;

        // read_one skips unknown sections, so the block starts at the last marker
        let offset = rfind(&data[start..end], BEGIN_MARKER).unwrap_or(0);
        let kind = match item {
            Item::X509Certificate(_) => BlockKind::Certificate,
            Item::Pkcs1Key(_) | Item::Pkcs8Key(_) | Item::Sec1Key(_) => BlockKind::PrivateKey,
            _ => BlockKind::Other,
        };
        out.push(PemBlock {
            kind,
            bytes: data.slice(start + offset..end),
        });
    }

    Ok(out)
}

/// Decode a certificate chain from PEM or a single DER certificate.
pub(crate) fn certificates(data: &[u8]) -> io::Result<Vec<CertificateDer<'static>>> {
    if is_pem(data) {
        let mut reader = Cursor::new(data);
        return rustls_pemfile::certs(&mut reader).collect();
    }
    if data.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![CertificateDer::from(data.to_vec())])
}

/// Decode the first private key from PEM, or sniff a DER key.
pub(crate) fn private_key(data: &[u8]) -> io::Result<Option<PrivateKeyDer<'static>>> {
    if is_pem(data) {
        let mut reader = Cursor::new(data);
        return rustls_pemfile::private_key(&mut reader);
    }
    Ok(PrivateKeyDer::try_from(data.to_vec()).ok())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
