//! Client-supplied predicates shipped to the server with bulk streams.
//!
//! The client only transports filters: a registry name the server resolves
//! to a predicate implementation, plus an opaque parameter blob. Nothing
//! here is executed or validated locally.

use bytes::Bytes;

use crate::error::AdminError;
use crate::proto;

/// A predicate to apply server-side while streaming entries.
pub trait StreamFilter: Send + Sync {
    /// Registry name the server resolves to a predicate implementation.
    fn name(&self) -> &str;

    /// Opaque parameter blob handed to the server-side predicate.
    fn payload(&self) -> Result<Bytes, AdminError>;
}

/// Filter naming a predicate registered on the server, with optional
/// parameters.
#[derive(Clone, Debug)]
pub struct NamedFilter {
    name: String,
    params: Bytes,
}

impl NamedFilter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Bytes::new(),
        }
    }

    pub fn with_params(name: impl Into<String>, params: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            params: params.into(),
        }
    }
}

impl StreamFilter for NamedFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn payload(&self) -> Result<Bytes, AdminError> {
        Ok(self.params.clone())
    }
}

/// Serialize a filter into its wire record.
pub(crate) fn encode(filter: &dyn StreamFilter) -> Result<proto::FilterSpec, AdminError> {
    let payload = filter.payload()?;
    Ok(proto::FilterSpec {
        name: filter.name().to_string(),
        payload,
    })
}
