//! `Set-Cookie` rendering.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// The `SameSite` cookie attribute.
///
/// `Default` leaves the attribute out and lets the browser decide.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    #[default]
    Default,
    Lax,
    Strict,
    None,
}

impl SameSite {
    fn attribute(self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Lax     => Some("Lax"),
            Self::Strict  => Some("Strict"),
            Self::None    => Some("None"),
        }
    }
}

/// A cookie to be sent to the client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    /// Seconds. Left out when `None`.
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: SameSite::Default,
        }
    }

    /// Sets both `Max-Age` and the equivalent `Expires`, counted from `now`.
    pub fn lifetime(mut self, now: DateTime<Utc>, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self.expires = Some(now + Duration::seconds(seconds));
        self
    }
}

/// IMF-fixdate, as required for `Expires`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(expires) = self.expires {
            write!(f, "; Expires={}", http_date(expires))?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if let Some(same_site) = self.same_site.attribute() {
            write!(f, "; SameSite={same_site}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn renders_every_attribute() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        let mut cookie = SetCookie::new("_csrf", "abc").lifetime(now, 86_400);
        cookie.path = Some("/".to_owned());
        cookie.domain = Some("example.com".to_owned());
        cookie.secure = true;
        cookie.http_only = true;
        cookie.same_site = SameSite::Strict;

        assert_eq!(
            cookie.to_string(),
            "_csrf=abc; Path=/; Domain=example.com; Expires=Thu, 22 Oct 2015 07:28:00 GMT; \
             Max-Age=86400; HttpOnly; Secure; SameSite=Strict",
        );
    }

    #[test]
    fn renders_through_any_formatter() {
        let mut cookie = SetCookie::new("session", "xyz");
        cookie.http_only = true;
        cookie.same_site = SameSite::Lax;
        assert_eq!(format!("[{cookie}]"), "[session=xyz; HttpOnly; SameSite=Lax]");
    }

    #[test]
    fn default_same_site_is_omitted() {
        assert_eq!(SetCookie::new("a", "1").to_string(), "a=1");
    }

    #[test]
    fn same_site_deserializes_lowercase() {
        let parsed: SameSite = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(parsed, SameSite::None);
    }
}
