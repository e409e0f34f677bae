use crate::core::moderation::PolicySet;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-feed rules read once at startup from a JSON file.
pub struct JsonPolicyStore {
    path: PathBuf,
}

impl JsonPolicyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<PolicySet, PolicyError> {
        let file = std::fs::File::open(&self.path)?;
        let policies: PolicySet = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(policies)
    }

    /// Load, or fall back to no rules at all so the bot keeps running.
    pub fn load_or_empty(&self) -> PolicySet {
        if !self.path.is_file() {
            tracing::warn!(path = %self.path.display(), "Rules file not found. No feed has rules.");
            return PolicySet::default();
        }

        match self.load() {
            Ok(policies) => {
                for (feed, policy) in &policies.feeds {
                    let names: Vec<&str> = policy.rules.iter().map(|r| r.name.as_str()).collect();
                    tracing::info!(feed = %feed, rules = ?names, "Loaded rules");
                }
                policies
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to load rules file: {}", e);
                PolicySet::default()
            }
        }
    }
}
