//! Turning a selected rule into a relay action.

use crate::metrics;
use crate::plan::Selection;
use crate::rule::{ArmedRule, NIL_REPLY};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultDecision {
    /// Forward the chunk unmodified.
    None,
    /// Sleep, then forward the chunk unmodified.
    Delay { duration_ms: u64, rule: String },
    /// Close the client side and stop relaying.
    Drop { rule: String },
    /// Write `reply` in place of the chunk.
    Substitute {
        reply: Vec<u8>,
        kind: SubstituteKind,
        rule: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstituteKind {
    Empty,
    Error,
}

impl SubstituteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubstituteKind::Empty => "return_empty",
            SubstituteKind::Error => "return_err",
        }
    }
}

impl FaultDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultDecision::None => "none",
            FaultDecision::Delay { .. } => "delay",
            FaultDecision::Drop { .. } => "drop",
            FaultDecision::Substitute { kind, .. } => kind.as_str(),
        }
    }
}

/// Precedence: drop, return_empty, return_err, then delay.
pub fn decide_fault(rule: Option<&ArmedRule>) -> FaultDecision {
    let Some(armed) = rule else {
        return FaultDecision::None;
    };
    let rule = armed.rule();
    let name = rule.name.clone();

    if rule.drop {
        return FaultDecision::Drop { rule: name };
    }
    if rule.return_empty {
        return FaultDecision::Substitute {
            reply: NIL_REPLY.to_vec(),
            kind: SubstituteKind::Empty,
            rule: name,
        };
    }
    if let Some(reply) = rule.error_reply() {
        return FaultDecision::Substitute {
            reply,
            kind: SubstituteKind::Error,
            rule: name,
        };
    }
    if rule.delay > 0 {
        return FaultDecision::Delay {
            duration_ms: rule.delay,
            rule: name,
        };
    }
    FaultDecision::None
}

/// Decide the fault for a selection and record it in metrics.
pub fn decide_and_record(selection: Selection) -> FaultDecision {
    match selection {
        Selection::NoMatch => FaultDecision::None,
        Selection::Suppressed(rule) => {
            metrics::record_rule_selection(rule.name(), false);
            FaultDecision::None
        }
        Selection::Applied(rule) => {
            metrics::record_rule_selection(rule.name(), true);
            let decision = decide_fault(Some(&*rule));
            match &decision {
                FaultDecision::None => {}
                FaultDecision::Delay { duration_ms, rule } => {
                    metrics::record_delay_injection(rule, *duration_ms)
                }
                FaultDecision::Drop { rule } => metrics::record_fault_injection("drop", rule),
                FaultDecision::Substitute { kind, rule, .. } => {
                    metrics::record_fault_injection(kind.as_str(), rule)
                }
            }
            decision
        }
    }
}

pub async fn apply_delay(duration_ms: u64) {
    tokio::time::sleep(Duration::from_millis(duration_ms)).await;
}
