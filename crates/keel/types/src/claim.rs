//! Users and their claims on contracts

use crate::policy::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A user known to the engine (loaded through an external user loader)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }
}

/// A declaration of use: user U wants contract C with labels L
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(flatten)]
    pub metadata: Metadata,

    /// Id of the user who requested the claim
    pub user: String,

    /// Contract locator, `name` or `namespace/name`
    pub contract: String,

    /// Labels provided by the user
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Claim {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        user: impl Into<String>,
        contract: impl Into<String>,
    ) -> Self {
        Self {
            metadata: Metadata::new(namespace, name),
            user: user.into(),
            contract: contract.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Unique claim id, `namespace/name`
    pub fn id(&self) -> String {
        self.metadata.locator()
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }
}
