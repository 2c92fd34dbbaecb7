//! PEM certificate chain helpers.

use std::collections::HashSet;
use std::io::BufReader;

use crate::constants::{PEM_CERT_BEGIN, PEM_CERT_END, TLS_CERT_KEY};
use crate::error::{Error, Result};

/// Split a PEM buffer into one block per certificate.
///
/// Each returned block starts with the BEGIN marker and ends with the END
/// marker followed by a newline. Text outside certificate blocks is dropped.
pub fn split_pem_chain(buffer: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = buffer;
    while let Some(start) = rest.find(PEM_CERT_BEGIN) {
        let Some(len) = rest[start..].find(PEM_CERT_END) else {
            break;
        };
        let end = start + len + PEM_CERT_END.len();
        blocks.push(format!("{}\n", &rest[start..end]));
        rest = &rest[end..];
    }
    blocks
}

/// Split every chain into certificates and drop duplicates.
///
/// Certificates are compared by their decoded DER content, so the same
/// certificate published with different line wrapping counts once. The first
/// occurrence is kept. A block that does not decode is a protocol error.
pub fn unique_certificates<'a>(chains: impl IntoIterator<Item = &'a str>) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for chain in chains {
        for block in split_pem_chain(chain) {
            let der = decode_block(&block)?;
            if seen.insert(der) {
                unique.push(block);
            }
        }
    }
    Ok(unique)
}

fn decode_block(block: &str) -> Result<Vec<u8>> {
    let mut reader = BufReader::new(block.as_bytes());
    let mut certs = rustls_pemfile::certs(&mut reader);
    match certs.next() {
        Some(Ok(cert)) => Ok(cert.as_ref().to_vec()),
        Some(Err(e)) => Err(Error::malformed(TLS_CERT_KEY, e)),
        None => Err(Error::malformed(TLS_CERT_KEY, "certificate block does not decode")),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A syntactically valid PEM block around `body` (base64).
    pub(crate) fn pem(body: &str) -> String {
        format!("{}\n{}\n{}\n", PEM_CERT_BEGIN, body, PEM_CERT_END)
    }

    #[test]
    fn test_split_chain() {
        let chain = format!("{}{}", pem("AAECAwQF"), pem("BgcICQoL"));
        let blocks = split_pem_chain(&chain);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], pem("AAECAwQF"));
        assert_eq!(blocks[1], pem("BgcICQoL"));
    }

    #[test]
    fn test_split_ignores_surrounding_text_and_missing_trailing_newline() {
        let chain = format!("subject=CN=x\n{}", pem("AAECAwQF").trim_end());
        let blocks = split_pem_chain(&chain);
        assert_eq!(blocks, vec![pem("AAECAwQF")]);
        assert!(split_pem_chain("").is_empty());
        assert!(split_pem_chain(PEM_CERT_BEGIN).is_empty());
    }

    #[test]
    fn test_unique_certificates_dedupes_by_content() {
        let a = pem("AAECAwQF");
        let b = pem("BgcICQoL");
        let chain_one = format!("{}{}", a, b);
        let certs = unique_certificates([chain_one.as_str(), a.as_str(), b.as_str()]).unwrap();
        assert_eq!(certs, vec![a, b]);
    }

    #[test]
    fn test_unique_certificates_rejects_garbage() {
        let bad = pem("not*base64");
        let err = unique_certificates([bad.as_str()]).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }
}
