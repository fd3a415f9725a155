//! The rule store.
//!
//! A [`Plan`] owns the ordered rule set and a name index behind a single
//! read/write lock. The proxy data path reads it once per client chunk;
//! the management adapters mutate it at any time.

use crate::rule::{ArmedRule, Rule, RuleSnapshot};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("percentage in rule '{name}' is malformed ({value}), it must be within 0-100")]
    InvalidPercentage { name: String, value: i32 },
    #[error("name of rule is required")]
    EmptyName,
    #[error("return_err in rule '{0}' must not be empty")]
    EmptyReturnErr(String),
    #[error("rule '{0}' already exists")]
    AlreadyExists(String),
    #[error("invalid command in rule '{name}': {reason}")]
    InvalidCommand { name: String, reason: String },
    #[error("no matching rule found")]
    NotFound(String),
}

impl PlanError {
    /// True for errors caused by a malformed or conflicting rule, as opposed
    /// to a lookup miss.
    pub fn is_validation(&self) -> bool {
        !matches!(self, PlanError::NotFound(_))
    }
}

/// Failure while hydrating a plan from a persisted rule list.
#[derive(Debug, Error)]
#[error("encountered error when adding rule #{index}: {source}")]
pub struct HydrateError {
    pub index: usize,
    #[source]
    pub source: PlanError,
}

#[derive(Debug, Default)]
struct Rules {
    ordered: Vec<Arc<ArmedRule>>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct Plan {
    rules: RwLock<Rules>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from a persisted rule list. `None` entries are skipped;
    /// the first invalid entry aborts hydration.
    pub fn hydrate<I>(rules: I) -> Result<Self, HydrateError>
    where
        I: IntoIterator<Item = Option<Rule>>,
    {
        let plan = Self::new();
        for (index, rule) in rules.into_iter().enumerate() {
            let Some(rule) = rule else { continue };
            plan.add_rule(rule)
                .map_err(|source| HydrateError { index, source })?;
        }
        Ok(plan)
    }

    pub fn add_rule(&self, rule: Rule) -> Result<(), PlanError> {
        validate(&rule)?;
        let name = rule.name.clone();
        let armed = ArmedRule::arm(rule).map_err(|e| PlanError::InvalidCommand {
            name: name.clone(),
            reason: e.to_string(),
        })?;

        let mut rules = self.rules.write();
        if rules.index.contains_key(&name) {
            return Err(PlanError::AlreadyExists(name));
        }
        rules.ordered.push(Arc::new(armed));
        let position = rules.ordered.len() - 1;
        rules.index.insert(name.clone(), position);
        debug!(rule = %name, position, "Rule added");
        Ok(())
    }

    pub fn delete_rule(&self, name: &str) -> Result<(), PlanError> {
        let mut rules = self.rules.write();
        let Some(position) = rules.index.remove(name) else {
            return Err(PlanError::NotFound(name.to_string()));
        };
        rules.ordered.remove(position);
        for idx in rules.index.values_mut() {
            if *idx > position {
                *idx -= 1;
            }
        }
        debug!(rule = %name, "Rule deleted");
        Ok(())
    }

    pub fn get_rule(&self, name: &str) -> Result<RuleSnapshot, PlanError> {
        let rules = self.rules.read();
        rules
            .index
            .get(name)
            .map(|&idx| rules.ordered[idx].snapshot())
            .ok_or_else(|| PlanError::NotFound(name.to_string()))
    }

    /// Snapshot of every rule in evaluation order. Empty, never absent,
    /// when the plan has no rules.
    pub fn list_rules(&self) -> Vec<RuleSnapshot> {
        self.rules
            .read()
            .ordered
            .iter()
            .map(|r| r.snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Choose the rule to apply to a chunk read from `client_addr`.
    pub fn select_rule(&self, client_addr: &str, chunk: &[u8]) -> Option<Arc<ArmedRule>> {
        self.select(client_addr, chunk).applied()
    }

    pub fn select_rule_with<R: Rng>(
        &self,
        client_addr: &str,
        chunk: &[u8],
        rng: &mut R,
    ) -> Option<Arc<ArmedRule>> {
        self.select_with(client_addr, chunk, rng).applied()
    }

    /// Like [`select_rule`](Self::select_rule), but reports a rule that was
    /// chosen and then held back by its percentage gate.
    pub fn select(&self, client_addr: &str, chunk: &[u8]) -> Selection {
        self.select_with(client_addr, chunk, &mut rand::thread_rng())
    }

    /// First-match selection with an explicit random source for the
    /// percentage gate.
    ///
    /// The chosen rule's hit counter is bumped before the gate is drawn, so a
    /// suppressed rule still counts as selected.
    pub fn select_with<R: Rng>(&self, client_addr: &str, chunk: &[u8], rng: &mut R) -> Selection {
        let rules = self.rules.read();
        let Some(chosen) = rules
            .ordered
            .iter()
            .find(|rule| rule.is_candidate(client_addr, chunk))
        else {
            return Selection::NoMatch;
        };

        chosen.record_hit();
        let percentage = chosen.rule().percentage;
        if percentage > 0 && rng.gen_range(0..100) > percentage {
            return Selection::Suppressed(Arc::clone(chosen));
        }
        Selection::Applied(Arc::clone(chosen))
    }
}

/// Outcome of rule selection for one chunk.
#[derive(Debug, Clone)]
pub enum Selection {
    NoMatch,
    /// A rule matched but its percentage gate declined this chunk.
    Suppressed(Arc<ArmedRule>),
    Applied(Arc<ArmedRule>),
}

impl Selection {
    pub fn applied(self) -> Option<Arc<ArmedRule>> {
        match self {
            Selection::Applied(rule) => Some(rule),
            _ => None,
        }
    }
}

fn validate(rule: &Rule) -> Result<(), PlanError> {
    if !(0..=100).contains(&rule.percentage) {
        return Err(PlanError::InvalidPercentage {
            name: rule.name.clone(),
            value: rule.percentage,
        });
    }
    if rule.name.is_empty() {
        return Err(PlanError::EmptyName);
    }
    if matches!(rule.return_err.as_deref(), Some("")) {
        return Err(PlanError::EmptyReturnErr(rule.name.clone()));
    }
    Ok(())
}
