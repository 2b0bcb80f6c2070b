//! Onion peer addresses.
//!
//! Every address the node stores goes through [`sanitize`] first, so the peer book only
//! ever holds the canonical bare form: lowercase, no scheme, no port, no path.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::error::GossipError;

/// Number of base32 characters in a v3 onion host label.
pub const ONION_LABEL_LEN: usize = 56;

/// Top-level suffix of every onion address.
pub const ONION_SUFFIX: &str = ".onion";

const BASE32_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Regex for a canonical v3 onion host.
static ONION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z2-7]{56}\.onion$").unwrap_or_else(|_| unreachable!()));

/// A canonical onion address, e.g. `abc…xyz.onion`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Parses and canonicalizes `input`, returning `None` for anything malformed.
    #[must_use]
    pub fn sanitize(input: &str) -> Option<Self> {
        sanitize(input)
    }

    /// Generates a random, well-formed address.
    ///
    /// Used for in-process networks where no real hidden service exists.
    #[must_use]
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let mut host: String = (0..ONION_LABEL_LEN)
            .map(|_| char::from(BASE32_ALPHABET[rng.gen_range(0..BASE32_ALPHABET.len())]))
            .collect();
        host.push_str(ONION_SUFFIX);
        Self(host)
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Canonicalizes a bare onion host or a URL-like string pointing at one.
///
/// Scheme, port, path, query and fragment are stripped and the host is lowercased before
/// being checked against the v3 onion format (56 characters of `[a-z2-7]` plus `.onion`).
#[must_use]
pub fn sanitize(input: &str) -> Option<PeerAddress> {
    let mut rest = input.trim();

    if let Some((_, after_scheme)) = rest.split_once("://") {
        rest = after_scheme;
    }
    if let Some(end) = rest.find(|c: char| matches!(c, '/' | '?' | '#')) {
        rest = &rest[..end];
    }
    if let Some((host, _port)) = rest.rsplit_once(':') {
        rest = host;
    }

    let host = rest.to_ascii_lowercase();
    ONION_REGEX.is_match(&host).then(|| PeerAddress(host))
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PeerAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PeerAddress {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeerAddress {
    type Err = GossipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        sanitize(s).ok_or_else(|| GossipError::InvalidAddress(s.to_string()))
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = GossipError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerAddress> for String {
    fn from(address: PeerAddress) -> Self {
        address.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const HOST: &str = "abcdefghijklmnopqrstuvwxyz234567abcdefghijklmnopqrstuvwx";

    fn bare() -> String {
        format!("{HOST}.onion")
    }

    #[test]
    fn host_fixture_has_expected_length() {
        assert_eq!(HOST.len(), ONION_LABEL_LEN);
    }

    #[test]
    fn sanitize_equivalent_forms() {
        let upper = bare().to_uppercase();
        let url = format!("http://{HOST}.onion:9050/gossip");
        let expected = sanitize(&bare()).expect("bare address is valid");

        assert_eq!(sanitize(&upper), Some(expected.clone()));
        assert_eq!(sanitize(&url), Some(expected.clone()));
        assert_eq!(expected.as_str(), bare());
    }

    #[test]
    fn sanitize_strips_query_and_whitespace() {
        let input = format!("  https://{HOST}.onion/path?x=1#frag \n");
        assert_eq!(sanitize(&input).map(String::from), Some(bare()));
    }

    #[test_case("" ; "empty string")]
    #[test_case("example.com" ; "clearnet host")]
    #[test_case("abc.onion" ; "too short")]
    #[test_case("abcdefghijklmnopqrstuvwxyz234567abcdefghijklmnopqrstuvwxy.onion" ; "too long")]
    #[test_case("abcdefghijklmnopqrstuvwxyz234567abcdefghijklmnopqrstuv01.onion" ; "digits outside base32")]
    #[test_case("abcdefghijklmnopqrstuvwxyz234567abcdefghijklmnopqrstuvwx.onion.evil" ; "extra suffix")]
    #[test_case("abcdefghijklmnopqrstuvwxyz234567abcdefghijklmnopqrstuvwx" ; "missing suffix")]
    fn sanitize_rejects(input: &str) {
        assert!(sanitize(input).is_none(), "expected '{input}' to be rejected");
    }

    #[test]
    fn from_str_reports_invalid_input() {
        let err = "nope".parse::<PeerAddress>().unwrap_err();
        assert!(matches!(err, GossipError::InvalidAddress(s) if s == "nope"));
    }

    #[test]
    fn serde_rejects_malformed_address() {
        let json = serde_json::to_string(&bare()).unwrap();
        let parsed: PeerAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_str(), bare());

        assert!(serde_json::from_str::<PeerAddress>("\"not-an-onion\"").is_err());
    }

    #[test]
    fn random_addresses_are_canonical() {
        for _ in 0..32 {
            let addr = PeerAddress::random();
            assert_eq!(sanitize(addr.as_str()), Some(addr));
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sanitize_is_idempotent(host in "[a-z2-7]{56}", port in 1u16..u16::MAX) {
                let url = format!("http://{}.onion:{port}/x", host.to_uppercase());
                let once = sanitize(&url).unwrap();
                let twice = sanitize(once.as_str()).unwrap();
                prop_assert_eq!(once, twice);
            }

            #[test]
            fn sanitize_never_panics(input in ".*") {
                let _ = sanitize(&input);
            }
        }
    }
}
