//! Source locator validation and session identity.
//!
//! A magnet URI is identified by its lowercased `btih` info hash; any other accepted
//! locator (an `http(s)` link to a `.torrent`) by the SHA-256 of its trimmed text.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{SessionError, SessionResult};
use crate::model::NewSession;

const BTIH_PREFIX: &str = "urn:btih:";

/// A validated source locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    id: String,
    display_name: Option<String>,
}

impl Locator {
    /// Validate `input` and derive its identity.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidLocator`] for blank input, magnet URIs without a
    /// usable `btih` topic, and anything that is not an `http(s)` URL.
    pub fn parse(input: &str) -> SessionResult<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(SessionError::InvalidLocator {
                reason: "locator is required",
            });
        }
        let url = Url::parse(raw).map_err(|_| SessionError::InvalidLocator {
            reason: "locator is not a URI",
        })?;
        match url.scheme() {
            "magnet" => Self::from_magnet(raw, &url),
            "http" | "https" if url.host_str().is_some() => Ok(Self {
                raw: raw.to_string(),
                id: format!("{:x}", Sha256::digest(raw.as_bytes())),
                display_name: None,
            }),
            _ => Err(SessionError::InvalidLocator {
                reason: "locator must be a magnet URI or an http(s) URL",
            }),
        }
    }

    fn from_magnet(raw: &str, url: &Url) -> SessionResult<Self> {
        let mut info_hash = None;
        let mut display_name = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" if info_hash.is_none() => {
                    info_hash = value
                        .get(..BTIH_PREFIX.len())
                        .filter(|prefix| prefix.eq_ignore_ascii_case(BTIH_PREFIX))
                        .map(|_| value[BTIH_PREFIX.len()..].to_ascii_lowercase());
                }
                "dn" if display_name.is_none() => {
                    let name = value.trim();
                    if !name.is_empty() {
                        display_name = Some(name.to_string());
                    }
                }
                _ => {}
            }
        }
        let id = info_hash
            .filter(|hash| is_info_hash(hash))
            .ok_or(SessionError::InvalidLocator {
                reason: "magnet URI has no valid btih info hash",
            })?;
        Ok(Self {
            raw: raw.to_string(),
            id,
            display_name,
        })
    }

    /// Trimmed locator text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Session identifier derived from the locator.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.id
    }

    /// Name advertised by the magnet `dn` parameter.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Build the registry draft, preferring a caller-supplied name.
    #[must_use]
    pub fn into_draft(self, requested_name: Option<&str>) -> NewSession {
        let requested = requested_name.map(str::trim).filter(|name| !name.is_empty());
        let (name, name_pinned) = match (requested, self.display_name.as_deref()) {
            (Some(name), _) => (name.to_string(), true),
            (None, Some(advertised)) => (advertised.to_string(), false),
            (None, None) => (placeholder_name(&self.id), false),
        };
        NewSession {
            id: self.id,
            locator: self.raw,
            name,
            name_pinned,
        }
    }
}

/// Normalise an identifier taken from a request path.
#[must_use]
pub fn normalize_session_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

/// Name shown until metadata arrives.
#[must_use]
pub fn placeholder_name(id: &str) -> String {
    let short: String = id.chars().take(8).collect();
    format!("Torrent {short}")
}

fn is_info_hash(hash: &str) -> bool {
    match hash.len() {
        40 => hash.chars().all(|c| c.is_ascii_hexdigit()),
        32 => hash
            .chars()
            .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "C12FE1C06BBA254A9DC9F519B335AA7C1367A88A";

    #[test]
    fn magnet_identity_is_the_lowercased_info_hash() -> SessionResult<()> {
        let locator = Locator::parse(&format!("  magnet:?xt=urn:btih:{HASH}&dn=Big+Buck+Bunny "))?;
        assert_eq!(locator.session_id(), HASH.to_ascii_lowercase());
        assert_eq!(locator.display_name(), Some("Big Buck Bunny"));
        assert!(locator.as_str().starts_with("magnet:"));

        let upper = Locator::parse(&format!("magnet:?XT=urn:btih:{HASH}"));
        assert!(upper.is_err(), "parameter names are case sensitive");
        Ok(())
    }

    #[test]
    fn base32_info_hashes_are_accepted() -> SessionResult<()> {
        let locator = Locator::parse("magnet:?xt=URN:BTIH:MFRGGZDFMZTWQ2LKNNWG23TPOBYXE43U")?;
        assert_eq!(locator.session_id(), "mfrggzdfmztwq2lknnwg23tpobyxe43u");
        Ok(())
    }

    #[test]
    fn http_locators_hash_to_a_stable_identity() -> SessionResult<()> {
        let first = Locator::parse("https://example.org/file.torrent")?;
        let second = Locator::parse(" https://example.org/file.torrent ")?;
        assert_eq!(first.session_id(), second.session_id());
        assert_eq!(first.session_id().len(), 64);
        assert!(first.display_name().is_none());
        Ok(())
    }

    #[test]
    fn invalid_locators_are_rejected() {
        for input in [
            "",
            "   ",
            "not a uri",
            "magnet:?dn=nohash",
            "magnet:?xt=urn:btih:xyz",
            "ftp://example.org/file.torrent",
            "file:///etc/passwd",
        ] {
            assert!(
                matches!(Locator::parse(input), Err(SessionError::InvalidLocator { .. })),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn drafts_prefer_requested_then_advertised_then_placeholder() -> SessionResult<()> {
        let magnet = format!("magnet:?xt=urn:btih:{HASH}&dn=Advertised");

        let draft = Locator::parse(&magnet)?.into_draft(Some(" Mine "));
        assert_eq!(draft.name, "Mine");
        assert!(draft.name_pinned);

        let draft = Locator::parse(&magnet)?.into_draft(Some("  "));
        assert_eq!(draft.name, "Advertised");
        assert!(!draft.name_pinned);

        let draft = Locator::parse(&format!("magnet:?xt=urn:btih:{HASH}"))?.into_draft(None);
        assert_eq!(draft.name, "Torrent c12fe1c0");
        assert!(!draft.name_pinned);
        Ok(())
    }

    #[test]
    fn path_identifiers_are_normalised() {
        assert_eq!(normalize_session_id(" ABCdef "), "abcdef");
    }
}
