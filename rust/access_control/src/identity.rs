//! Principals presented to the resolver.

use serde::{Deserialize, Serialize};

/// An authenticated principal as seen by the authorization path.
pub trait UserInfo {
    fn name(&self) -> &str;
    /// Group memberships, in whatever order the identity source reports them.
    fn groups(&self) -> &[String];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new(name: &str, groups: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }
}

impl UserInfo for Identity {
    fn name(&self) -> &str {
        &self.name
    }

    fn groups(&self) -> &[String] {
        &self.groups
    }
}
