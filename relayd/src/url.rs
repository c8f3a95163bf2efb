use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::ParseError;

/// A url that knows whether it may be logged in full.
///
/// RPC endpoints routinely embed API keys in their path or query, so sensitive urls only
/// reveal their scheme and host when formatted.
#[derive(Hash, PartialEq, Eq, Clone)]
pub struct Url {
    inner: url::Url,
    is_sensitive: bool,
}

impl Deref for Url {
    type Target = url::Url;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Url {
    pub fn new_sensitive(s: &str) -> Result<Self, ParseError> {
        url::Url::parse(s).map(|inner| Self {
            inner,
            is_sensitive: true,
        })
    }

    pub fn new_non_sensitive(s: &str) -> Result<Self, ParseError> {
        url::Url::parse(s).map(|inner| Self {
            inner,
            is_sensitive: false,
        })
    }

    pub fn deserialize_sensitive<'de, D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new_sensitive(&s).map_err(|err| D::Error::custom(err.to_string()))
    }

    pub fn deserialize_non_sensitive<'de, D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new_non_sensitive(&s).map_err(|err| D::Error::custom(err.to_string()))
    }

    /// Joins `path` onto the url, keeping any path prefix the url already has.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.inner.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn to_standard_url(&self) -> url::Url {
        self.inner.clone()
    }
}

impl Serialize for Url {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.inner.as_str())
    }
}

impl Display for Url {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if !self.is_sensitive {
            return f.write_str(self.inner.as_str());
        }

        match self.inner.host_str() {
            Some(host) => write!(f, "{}://{}/[REDACTED]", self.inner.scheme(), host),
            None => f.write_str("[REDACTED]"),
        }
    }
}

impl Debug for Url {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
