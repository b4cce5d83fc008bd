use coordinator::PoolFingerprint;
use std::fmt;
use url::Url;

pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

// Errors name the relay by position, the raw entry may carry credentials.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RelayError {
    #[error("relay #{index} is not a valid url: {source}")]
    InvalidUrl {
        index: usize,
        source: url::ParseError,
    },
    #[error("relay #{index} has unsupported scheme {scheme}")]
    UnsupportedScheme { index: usize, scheme: String },
    #[error("relay #{index} has no host")]
    MissingHost { index: usize },
    #[error("relay #{index} has no port")]
    MissingPort { index: usize },
}

/// An upstream proxy at a fixed position of its pool.
#[derive(Clone, Debug)]
pub struct Relay {
    index: usize,
    url: Url,
}

impl Relay {
    pub fn parse(index: usize, raw: &str) -> Result<Self, RelayError> {
        let url = Url::parse(raw.trim()).map_err(|source| RelayError::InvalidUrl { index, source })?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(RelayError::UnsupportedScheme {
                index,
                scheme: url.scheme().to_string(),
            });
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(RelayError::MissingHost { index });
        }
        if url.port_or_known_default().is_none() {
            return Err(RelayError::MissingPort { index });
        }

        Ok(Relay { index, url })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Full url, credentials included. Never log this.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

// Credentials are left out so relays can be logged.
impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}",
            self.url.scheme(),
            self.url.host_str().unwrap_or_default()
        )?;
        if let Some(port) = self.url.port_or_known_default() {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// The configured relays, in configuration order, and the fingerprint that
/// namespaces their shared state.
#[derive(Debug)]
pub struct RelayPool {
    relays: Vec<Relay>,
    fingerprint: PoolFingerprint,
}

impl RelayPool {
    pub fn try_new<I, S>(urls: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let relays = urls
            .into_iter()
            .enumerate()
            .map(|(index, raw)| Relay::parse(index, raw.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let fingerprint = PoolFingerprint::from_urls(relays.iter().map(|r| r.url.as_str()));

        Ok(RelayPool {
            relays,
            fingerprint,
        })
    }

    pub fn get(&self, index: usize) -> Option<&Relay> {
        self.relays.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relay> {
        self.relays.iter()
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    pub fn fingerprint(&self) -> &PoolFingerprint {
        &self.fingerprint
    }
}
