use std::fmt;

use serde::{Deserialize, Serialize};

/// Composite key addressing one manifest.
///
/// Two resources of the same kind but different namespace or name (e.g. two
/// `database` entries in separate tenants) have distinct identities.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}
