use std::collections::BTreeMap;
use url::Url;

use crate::error::{Result, StreamError};

/// Target of a subscription: a resource path plus query parameters.
///
/// Each parameter key appears at most once on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    resource: String,
    params: BTreeMap<String, String>,
}

impl StreamRequest {
    /// Creates a request for `resource`.
    ///
    /// `resource` may be absolute (`https://host/path`), origin-relative
    /// (`/api/jobs/1/stream`) or relative to the base path
    /// (`jobs/1/stream`).
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a query parameter, replacing any earlier value for `key`.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Adds several query parameters.
    #[must_use]
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// The resource as given.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Resolve against `base` into the final URL.
    ///
    /// A parameter replaces a same-named pair already present in the
    /// resource's own query string.
    pub fn resolve(&self, base: &Url) -> Result<Url> {
        let mut url = match Url::parse(&self.resource) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) => base.join(&self.resource)?,
            Err(e) => return Err(e.into()),
        };
        if !matches!(url.scheme(), "http" | "https") {
            return Err(StreamError::Config(format!(
                "stream resource must resolve to http(s), got {url}"
            )));
        }

        if !self.params.is_empty() {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| !self.params.contains_key(k.as_ref()))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            url.set_query(None);
            url.query_pairs_mut()
                .extend_pairs(kept)
                .extend_pairs(&self.params);
        }
        Ok(url)
    }
}
