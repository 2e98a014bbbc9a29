//! Typed resource addresses
//!
//! Resources are named on the wire as `<kind>://<key>` URIs. Callers build a
//! [`ResourceAddress`] instead of formatting strings; the proxy renders it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Resource families a provider may serve
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Patients,
}

impl ResourceKind {
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Patients => "patients",
        }
    }
}

/// Which member(s) of a family
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKey {
    All,
    Id(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceAddress {
    pub kind: ResourceKind,
    pub key: ResourceKey,
}

impl ResourceAddress {
    pub const fn new(kind: ResourceKind, key: ResourceKey) -> Self {
        Self { kind, key }
    }

    pub const fn all_patients() -> Self {
        Self::new(ResourceKind::Patients, ResourceKey::All)
    }

    pub fn patient(id: impl Into<String>) -> Self {
        Self::new(ResourceKind::Patients, ResourceKey::Id(id.into()))
    }

    pub fn uri(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            ResourceKey::All => write!(f, "{}://all", self.kind.scheme()),
            ResourceKey::Id(id) => write!(f, "{}://{id}", self.kind.scheme()),
        }
    }
}

impl FromStr for ResourceAddress {
    type Err = AgentError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| AgentError::Validation(format!("not a resource URI: '{uri}'")))?;
        let kind = match scheme {
            "patients" => ResourceKind::Patients,
            other => {
                return Err(AgentError::Validation(format!("unknown resource kind '{other}'")));
            }
        };
        let key = match rest {
            "" => return Err(AgentError::Validation(format!("resource URI '{uri}' has no key"))),
            "all" => ResourceKey::All,
            id if id.contains('/') => {
                return Err(AgentError::Validation(format!("invalid resource key '{id}'")));
            }
            id => ResourceKey::Id(id.to_string()),
        };
        Ok(Self { kind, key })
    }
}
