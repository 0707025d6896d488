//! Pulling candidate credential values out of a request.
//!
//! A lookup string lists where to look, in order:
//!
//! ```text
//! entry ("," entry)*        entry = source ":" name (":" prefix)?
//! source = query | param | cookie | form | header
//! ```
//!
//! `"header:Authorization:Bearer ,cookie:session"` first reads the
//! `Authorization` header, keeping only values that start with `Bearer `
//! (case-insensitive) and cutting that prefix off, then falls back to every
//! cookie named `session`.
//!
//! Each [`Extractor`] returns at most [`EXTRACTOR_LIMIT`] candidates, so a
//! request stuffing hundreds of values into one field cannot make a validator
//! run hundreds of times.

use std::fmt;
use std::str::FromStr;

use http::header::{AUTHORIZATION, HeaderName};
use thiserror::Error;

use crate::error::ConfigError;
use crate::request::Request;

/// Upper bound on the candidates a single extractor returns.
pub const EXTRACTOR_LIMIT: usize = 20;

/// Request location an extractor reads from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Source {
    Query,
    Param,
    Cookie,
    Form,
    Header,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query  => "query",
            Self::Param  => "param",
            Self::Cookie => "cookie",
            Self::Form   => "form",
            Self::Header => "header",
        }
    }

    fn location(self) -> &'static str {
        match self {
            Self::Query  => "the query string",
            Self::Param  => "path params",
            Self::Cookie => "cookies",
            Self::Form   => "the form",
            Self::Header => "request header",
        }
    }
}

impl FromStr for Source {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query"  => Ok(Self::Query),
            "param"  => Ok(Self::Param),
            "cookie" => Ok(Self::Cookie),
            "form"   => Ok(Self::Form),
            "header" => Ok(Self::Header),
            _        => Err(()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an extractor produced no candidates.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum ExtractError {
    /// Nothing bound to the name in this source.
    #[error("missing value in {}", .0.location())]
    Missing(Source),

    /// Values present, but none carried the configured prefix.
    #[error("invalid value in {}", .0.location())]
    Invalid(Source),
}

impl ExtractError {
    pub fn source_kind(self) -> Source {
        match self {
            Self::Missing(source) | Self::Invalid(source) => source,
        }
    }
}

// ── LookupSpec ────────────────────────────────────────────────────────────────

/// One parsed `source:name[:prefix]` entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LookupEntry {
    pub source: Source,
    pub name: String,
    /// Present only when the entry spelled out a third segment, even an
    /// empty one.
    pub prefix: Option<String>,
}

/// An ordered, parsed lookup string. Immutable once built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LookupSpec {
    entries: Vec<LookupEntry>,
}

impl LookupSpec {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        if spec.trim().is_empty() {
            return Err(ConfigError::EmptyLookup);
        }
        let entries = spec.split(',').map(parse_entry).collect::<Result<_, _>>()?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[LookupEntry] {
        &self.entries
    }

    /// Builds one extractor per entry, in order.
    ///
    /// `auth_scheme` is what JWT and key auth pass (e.g. `"Bearer"`). It only
    /// matters for an `Authorization` header entry without an explicit
    /// prefix: the scheme plus a trailing space becomes the prefix. Older
    /// configurations rely on this; no other header gets the treatment.
    pub fn extractors(&self, auth_scheme: Option<&str>) -> Result<Vec<Extractor>, ConfigError> {
        self.entries.iter().map(|entry| Extractor::build(entry, auth_scheme)).collect()
    }
}

impl FromStr for LookupSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parses `lookup` and builds its extractors in one step.
pub fn create_extractors(lookup: &str, auth_scheme: Option<&str>) -> Result<Vec<Extractor>, ConfigError> {
    LookupSpec::parse(lookup)?.extractors(auth_scheme)
}

fn parse_entry(entry: &str) -> Result<LookupEntry, ConfigError> {
    let mut parts = entry.splitn(3, ':');
    let (Some(source), Some(name)) = (parts.next(), parts.next()) else {
        return Err(ConfigError::MalformedLookup { entry: entry.to_owned() });
    };
    let (source, name) = (source.trim(), name.trim());
    if name.is_empty() {
        return Err(ConfigError::MalformedLookup { entry: entry.to_owned() });
    }
    let source = source.parse::<Source>().map_err(|()| ConfigError::UnknownSource {
        entry: entry.to_owned(),
        source_name: source.to_owned(),
    })?;
    Ok(LookupEntry {
        source,
        name: name.to_owned(),
        prefix: parts.next().map(str::to_owned),
    })
}

// ── Extractor ─────────────────────────────────────────────────────────────────

/// Reads one request location for values bound to one name.
///
/// Stateless; one instance serves every request concurrently.
#[derive(Clone, Debug)]
pub struct Extractor {
    source: Source,
    name: String,
    header: Option<HeaderName>,
    prefix: String,
}

impl Extractor {
    fn build(entry: &LookupEntry, auth_scheme: Option<&str>) -> Result<Self, ConfigError> {
        let mut header = None;
        let mut prefix = String::new();

        if entry.source == Source::Header {
            let name = HeaderName::from_bytes(entry.name.as_bytes())
                .map_err(|_| ConfigError::InvalidHeaderName { name: entry.name.clone() })?;

            prefix = match (&entry.prefix, auth_scheme) {
                (Some(explicit), _) => explicit.clone(),
                (None, Some(scheme)) if !scheme.is_empty() && name == AUTHORIZATION => {
                    if scheme.ends_with(' ') { scheme.to_owned() } else { format!("{scheme} ") }
                }
                _ => String::new(),
            };
            header = Some(name);
        }

        Ok(Self { source: entry.source, name: entry.name.clone(), header, prefix })
    }

    /// A header extractor built from an already valid name, keeping only
    /// values that start with `prefix`.
    pub fn header(name: HeaderName, prefix: impl Into<String>) -> Self {
        Self {
            source: Source::Header,
            name: name.as_str().to_owned(),
            header: Some(name),
            prefix: prefix.into(),
        }
    }

    pub fn source(&self) -> Source { self.source }
    pub fn name(&self) -> &str { &self.name }
    pub fn prefix(&self) -> &str { &self.prefix }

    /// Candidate values in request order, at most [`EXTRACTOR_LIMIT`].
    pub fn extract(&self, req: &Request) -> Result<Vec<String>, ExtractError> {
        let mut values = match (self.source, &self.header) {
            (Source::Header, Some(header)) => return self.from_header(req, header),
            (Source::Query, _) => req.query_values(&self.name),
            (Source::Form, _) => req.form_values(&self.name),
            (Source::Param, _) => req.param(&self.name).map(str::to_owned).into_iter().collect(),
            (Source::Cookie, _) => req.cookies()
                .into_iter()
                .filter(|(name, _)| *name == self.name)
                .take(EXTRACTOR_LIMIT)
                .map(|(_, value)| value.to_owned())
                .collect(),
            (Source::Header, None) => Vec::new(),
        };
        if values.is_empty() {
            return Err(ExtractError::Missing(self.source));
        }
        values.truncate(EXTRACTOR_LIMIT);
        Ok(values)
    }

    fn from_header(&self, req: &Request, header: &HeaderName) -> Result<Vec<String>, ExtractError> {
        let raw = req.headers().get_all(header);
        if raw.iter().next().is_none() {
            return Err(ExtractError::Missing(Source::Header));
        }

        let cut = self.prefix.len();
        let values: Vec<String> = raw.iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| {
                if cut == 0 {
                    return Some(value.to_owned());
                }
                let head = value.get(..cut)?;
                (value.len() > cut && head.eq_ignore_ascii_case(&self.prefix))
                    .then(|| value[cut..].to_owned())
            })
            .take(EXTRACTOR_LIMIT)
            .collect();

        if values.is_empty() {
            return Err(if cut > 0 {
                ExtractError::Invalid(Source::Header)
            } else {
                ExtractError::Missing(Source::Header)
            });
        }
        Ok(values)
    }
}
