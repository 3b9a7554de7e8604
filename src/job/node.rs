//! Resolved file-system node

use serde::{Deserialize, Serialize};

use super::replacer::Replacer;

/// Location a request ultimately targets, supplied by an external resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedNode {
    /// Repository identifier
    pub repo: String,
    /// Directory path inside the repository
    pub dir: String,
    /// File name
    pub basename: String,
}

impl ResolvedNode {
    /// Placeholder values derived from the node: `repo`, `nodedir`, `nodename`
    pub fn replacements(&self) -> Vec<(&'static str, String)> {
        vec![
            ("repo", self.repo.clone()),
            ("nodedir", self.dir.trim_start_matches('/').to_string()),
            ("nodename", self.basename.clone()),
        ]
    }

    /// Set the node placeholders on `replacer`
    pub fn apply(&self, replacer: &mut dyn Replacer) {
        for (name, value) in self.replacements() {
            replacer.set(name, &value);
        }
    }
}
