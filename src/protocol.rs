//! Peer protocol messages.
//!
//! A request is carried entirely by the URL path: `<base_path><group>/<key>`, both parts percent-encoded. The response
//! body is a postcard-encoded [`FetchResponse`].

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};

/// Content type of a successful peer response.
pub const CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub group: String,
    pub key:   String,
}

impl FetchRequest {
    pub fn new(group: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            key:   key.into(),
        }
    }

    pub fn to_path(&self, base_path: &str) -> String {
        format!(
            "{base_path}{}/{}",
            urlencoding::encode(&self.group),
            urlencoding::encode(&self.key)
        )
    }

    /// Parses a request path. Anything which isn't `<base_path><group>/<key>` is a [`CacheError::BadRequest`].
    pub fn from_path(path: &str, base_path: &str) -> Result<Self> {
        let Some(rest) = path.strip_prefix(base_path)
        else {
            return Err(CacheError::BadRequest(format!("unexpected path '{path}'")));
        };

        let Some((group, key)) = rest.split_once('/')
        else {
            return Err(CacheError::BadRequest(format!(
                "path '{path}' doesn't match <group>/<key>"
            )));
        };

        let group = urlencoding::decode(group)
            .map_err(|err| CacheError::BadRequest(format!("malformed group name: {err}")))?
            .into_owned();
        let key = urlencoding::decode(key)
            .map_err(|err| CacheError::BadRequest(format!("malformed key: {err}")))?
            .into_owned();

        Ok(Self { group, key })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchResponse {
    pub value: Vec<u8>,
}

impl FetchResponse {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }
}
