//! Human-readable (bech32, NIP-19) identifiers to the raw forms used in
//! filters.
//!
//! Raw input passes through unchanged, so normalizing twice is the
//! same as normalizing once.

use bech32::{FromBase32, ToBase32, Variant};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("invalid bech32 identifier {0:?}: {1}")]
    Bech32(String, String),
    #[error("refusing to decode {0:?} identifiers")]
    Unsupported(&'static str),
    #[error("malformed {prefix} identifier: {reason}")]
    Malformed { prefix: &'static str, reason: String },
    #[error("invalid template coordinate {0:?}, expecting nostr:<npub>/<name>")]
    Coordinate(String),
}

const PREFIXES: &[&str] = &["npub", "note", "nprofile", "nevent", "naddr", "nsec", "nrelay"];

/// The bech32 prefix of `s` if it is one we know about.
fn known_prefix(s: &str) -> Option<&'static str> {
    let lower = s.to_ascii_lowercase();
    PREFIXES.iter().copied().find(|p| {
        lower.len() > p.len() + 1
            && lower.starts_with(p)
            && lower.as_bytes()[p.len()] == b'1'
    })
}

/// Type-length-value entries as used by `nprofile`, `nevent` and
/// `naddr`.
fn parse_tlv<'a>(prefix: &'static str, data: &'a [u8]) -> Result<Vec<(u8, &'a [u8])>, IdentifierError> {
    let mut res = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(IdentifierError::Malformed {
                prefix, reason: "truncated TLV header".into()
            })
        }
        let (t, l) = (rest[0], rest[1] as usize);
        if rest.len() < 2 + l {
            return Err(IdentifierError::Malformed {
                prefix, reason: format!("TLV entry {t} is truncated")
            })
        }
        res.push((t, &rest[2..2 + l]));
        rest = &rest[2 + l..];
    }
    Ok(res)
}

fn hex32(prefix: &'static str, what: &str, bytes: &[u8]) -> Result<String, IdentifierError> {
    if bytes.len() != 32 {
        return Err(IdentifierError::Malformed {
            prefix, reason: format!("{what} has {} bytes instead of 32", bytes.len())
        })
    }
    Ok(hex::encode(bytes))
}

/// Normalize an identifier to raw form: `npub`/`nprofile` give the
/// public key hex, `note`/`nevent` the event id hex, `naddr` the
/// coordinate `kind:pubkey:d`. A `nostr:` URI prefix is accepted.
/// Anything else is returned unchanged.
pub fn decode_identifier(s: &str) -> Result<String, IdentifierError> {
    let s = s.trim();
    let bare = s.strip_prefix("nostr:").unwrap_or(s);
    let prefix = match known_prefix(bare) {
        Some(p) => p,
        None => return Ok(s.to_string())
    };
    if prefix == "nsec" {
        return Err(IdentifierError::Unsupported("nsec"))
    }
    if prefix == "nrelay" {
        return Err(IdentifierError::Unsupported("nrelay"))
    }
    let (_hrp, data5, _variant) = bech32::decode(bare).map_err(
        |e| IdentifierError::Bech32(bare.to_string(), e.to_string()))?;
    let data = Vec::<u8>::from_base32(&data5).map_err(
        |e| IdentifierError::Bech32(bare.to_string(), e.to_string()))?;
    match prefix {
        "npub" => hex32(prefix, "public key", &data),
        "note" => hex32(prefix, "event id", &data),
        "nprofile" | "nevent" => {
            let tlv = parse_tlv(prefix, &data)?;
            match tlv.iter().find(|(t, _)| *t == 0) {
                Some((_, v)) => hex32(prefix, "special entry", v),
                None => Err(IdentifierError::Malformed {
                    prefix, reason: "missing special entry".into()
                })
            }
        }
        "naddr" => {
            let tlv = parse_tlv(prefix, &data)?;
            let missing = |what: &str| IdentifierError::Malformed {
                prefix, reason: format!("missing {what}")
            };
            let d = tlv.iter().find(|(t, _)| *t == 0).ok_or_else(|| missing("identifier"))?.1;
            let author = tlv.iter().find(|(t, _)| *t == 2).ok_or_else(|| missing("author"))?.1;
            let kind = tlv.iter().find(|(t, _)| *t == 3).ok_or_else(|| missing("kind"))?.1;
            let kind: [u8; 4] = kind.try_into().map_err(|_| IdentifierError::Malformed {
                prefix, reason: "kind is not 4 bytes".into()
            })?;
            let d = std::str::from_utf8(d).map_err(|e| IdentifierError::Malformed {
                prefix, reason: format!("identifier is not UTF-8: {e}")
            })?;
            Ok(format!("{}:{}:{}",
                       u32::from_be_bytes(kind),
                       hex32(prefix, "author", author)?,
                       d))
        }
        _ => unreachable!("all prefixes handled above")
    }
}

fn encode32(hrp: &str, hexstr: &str) -> Result<String, IdentifierError> {
    let bytes = hex::decode(hexstr).map_err(|e| IdentifierError::Malformed {
        prefix: "hex", reason: e.to_string()
    })?;
    bech32::encode(hrp, bytes.to_base32(), Variant::Bech32).map_err(
        |e| IdentifierError::Bech32(hexstr.to_string(), e.to_string()))
}

/// The `npub` form of a hex public key.
pub fn encode_npub(pubkey_hex: &str) -> Result<String, IdentifierError> {
    encode32("npub", pubkey_hex)
}

/// The `note` form of a hex event id.
pub fn encode_note(id_hex: &str) -> Result<String, IdentifierError> {
    encode32("note", id_hex)
}

/// Where a template record lives: its author's public key (hex) and
/// its name (the record's `d` tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCoordinate {
    pub author: String,
    pub name: String,
}

impl TemplateCoordinate {
    /// The logical id under which the template is cached.
    pub fn logical_id(&self) -> String {
        format!("{}/{}", self.author, self.name)
    }
}

/// Parses `nostr:<npub>/<name>` (the `nostr:` prefix is optional,
/// the author may also be given as hex).
pub fn parse_template_coordinate(s: &str) -> Result<TemplateCoordinate, IdentifierError> {
    let s = s.trim();
    let bare = s.strip_prefix("nostr:").unwrap_or(s);
    let (author, name) = bare.split_once('/').ok_or_else(
        || IdentifierError::Coordinate(s.to_string()))?;
    if author.is_empty() || name.is_empty() {
        return Err(IdentifierError::Coordinate(s.to_string()))
    }
    Ok(TemplateCoordinate {
        author: decode_identifier(author)?,
        name: name.to_string(),
    })
}
