//! Persisted rule list loaded at startup.

use crate::plan::Plan;
use crate::rule::Rule;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk form of a plan: `{"rules": [...]}`. Null entries are tolerated
/// and skipped during hydration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlanFile {
    #[serde(default)]
    pub rules: Vec<Option<Rule>>,
}

impl PlanFile {
    /// Parse a plan file. YAML is used for `.yaml`/`.yml`, JSON otherwise.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let plan_file = if is_yaml {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid plan YAML in {}", path.display()))?
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid plan JSON in {}", path.display()))?
        };
        Ok(plan_file)
    }

    pub fn into_plan(self) -> Result<Plan, anyhow::Error> {
        Ok(Plan::hydrate(self.rules)?)
    }
}

/// Load and hydrate a plan in one step.
pub fn load_plan<P: AsRef<Path>>(path: P) -> Result<Plan, anyhow::Error> {
    let path = path.as_ref();
    PlanFile::from_file(path)?
        .into_plan()
        .with_context(|| format!("Failed to load plan {}", path.display()))
}
