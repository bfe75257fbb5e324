//! The Wildland path grammar.
//!
//! ```text
//! [owner][@hint]:(/part)+:[file_path]
//! ```
//!
//! - `owner`: a fingerprint (`0x…`), an alias (`@default`,
//!   `@default-owner`), or absent (the default owner applies)
//! - `hint`: an optional location of the owner's user manifest, written
//!   `@scheme{host/path}` so the URL's own colons do not collide with the
//!   path separators
//! - each `part` is an absolute POSIX path naming a container
//! - `file_path`: optional absolute path of a file in the last container
//!
//! `:/books/scifi:` resolves to containers; `:/books/scifi:/a.pdf` to a
//! file. `0xaaa@https{example.com/alice.yaml}:/work:` fetches the user
//! manifest from the hint if `0xaaa` is unknown locally.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("not a Wildland path: {0}")]
    NotWildland(String),
    #[error("unrecognized owner field: {0}")]
    BadOwner(String),
    #[error("part is not an absolute path: {0}")]
    BadPart(String),
    #[error("path has no container parts: {0}")]
    NoParts(String),
    #[error("unknown alias: @{0}")]
    UnknownAlias(String),
    #[error("{0}")]
    Other(String),
}

fn fingerprint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0x[0-9a-f]+$").expect("static regex"))
}

fn alias_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@[a-z][a-z-]*$").expect("static regex"))
}

fn hinted_owner_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(0x[0-9a-f]+)@([a-z][a-z0-9+.-]*)\{([^}]+)\}$").expect("static regex")
    })
}

fn wlpath_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(0x[0-9a-f]+(@[a-z][a-z0-9+.-]*\{[^}]+\})?|@[a-z][a-z-]*)?:")
            .expect("static regex")
    })
}

/// A parsed path in the Wildland namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildlandPath {
    /// Fingerprint or `@alias`; `None` means the default owner.
    pub owner: Option<String>,
    /// URL where the owner's user manifest can be fetched.
    pub hint: Option<String>,
    /// Container parts, each an absolute path. Never empty.
    pub parts: Vec<String>,
    /// File path within the final container.
    pub file_path: Option<String>,
}

impl WildlandPath {
    /// Quick syntactic check, for telling Wildland paths apart from local
    /// paths and URLs. Does not guarantee that parsing succeeds.
    pub fn matches(s: &str) -> bool {
        wlpath_re().is_match(s)
    }

    pub fn from_str(s: &str) -> Result<Self, PathError> {
        if !s.contains(':') {
            return Err(PathError::NotWildland(s.to_string()));
        }

        let split: Vec<&str> = s.split(':').collect();

        let (owner, hint) = parse_owner(split[0])?;

        let mut parts = Vec::new();
        for part in &split[1..split.len() - 1] {
            if !part.starts_with('/') {
                return Err(PathError::BadPart((*part).to_string()));
            }
            parts.push((*part).to_string());
        }

        let last = split[split.len() - 1];
        let file_path = if last.is_empty() {
            None
        } else if last.starts_with('/') {
            Some(last.to_string())
        } else {
            return Err(PathError::BadPart(last.to_string()));
        };

        if parts.is_empty() {
            return Err(PathError::NoParts(s.to_string()));
        }

        Ok(WildlandPath {
            owner,
            hint,
            parts,
            file_path,
        })
    }

    pub fn has_file(&self) -> bool {
        self.file_path.is_some()
    }

    /// The same path without its file part.
    pub fn without_file(&self) -> WildlandPath {
        WildlandPath {
            file_path: None,
            ..self.clone()
        }
    }
}

fn parse_owner(field: &str) -> Result<(Option<String>, Option<String>), PathError> {
    if field.is_empty() {
        return Ok((None, None));
    }
    if fingerprint_re().is_match(field) || alias_re().is_match(field) {
        return Ok((Some(field.to_string()), None));
    }
    if let Some(caps) = hinted_owner_re().captures(field) {
        let owner = caps[1].to_string();
        let url = format!("{}://{}", &caps[2], &caps[3]);
        return Ok((Some(owner), Some(url)));
    }
    Err(PathError::BadOwner(field.to_string()))
}

impl fmt::Display for WildlandPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(owner) = &self.owner {
            f.write_str(owner)?;
            if let Some(hint) = &self.hint {
                let (scheme, rest) = hint.split_once("://").unwrap_or(("https", hint));
                write!(f, "@{scheme}{{{rest}}}")?;
            }
        }
        for part in &self.parts {
            write!(f, ":{part}")?;
        }
        f.write_str(":")?;
        if let Some(file) = &self.file_path {
            f.write_str(file)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let path = WildlandPath::from_str(":/books:").unwrap();
        assert_eq!(path.owner, None);
        assert_eq!(path.parts, ["/books"]);
        assert_eq!(path.file_path, None);
    }

    #[test]
    fn test_parse_owner_and_file() {
        let path = WildlandPath::from_str("0xaaa:/books:/scifi:/dune.pdf").unwrap();
        assert_eq!(path.owner.as_deref(), Some("0xaaa"));
        assert_eq!(path.parts, ["/books", "/scifi"]);
        assert_eq!(path.file_path.as_deref(), Some("/dune.pdf"));
    }

    #[test]
    fn test_parse_alias() {
        let path = WildlandPath::from_str("@default:/work:").unwrap();
        assert_eq!(path.owner.as_deref(), Some("@default"));
    }

    #[test]
    fn test_parse_hint() {
        let path =
            WildlandPath::from_str("0xaaa@https{example.com/alice.user.yaml}:/work:").unwrap();
        assert_eq!(path.owner.as_deref(), Some("0xaaa"));
        assert_eq!(
            path.hint.as_deref(),
            Some("https://example.com/alice.user.yaml")
        );
    }

    #[test]
    fn test_rejects_relative_part() {
        assert!(matches!(
            WildlandPath::from_str(":books:").unwrap_err(),
            PathError::BadPart(_)
        ));
    }

    #[test]
    fn test_rejects_missing_trailing_colon() {
        // "/a" becomes a file path, leaving no container parts.
        assert!(matches!(
            WildlandPath::from_str(":/a").unwrap_err(),
            PathError::NoParts(_)
        ));
    }

    #[test]
    fn test_rejects_bad_owner() {
        assert!(matches!(
            WildlandPath::from_str("bogus:/a:").unwrap_err(),
            PathError::BadOwner(_)
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        for s in [
            ":/books:",
            "0xaaa:/books:/scifi:/dune.pdf",
            "@default:/work:",
            "0xaaa@https{example.com/alice.yaml}:/work:",
        ] {
            let path = WildlandPath::from_str(s).unwrap();
            assert_eq!(path.to_string(), s);
            assert!(WildlandPath::matches(s));
        }
    }
}
