//! Readiness classification.
//!
//! Two fixed state machines: replica counts for workload kinds and a single named condition for
//! condition-based kinds. Which one a kind uses comes from [`readiness_rule`]; they are never mixed.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::kind::{KnownKind, ResourceKind};
use crate::path::{extract, extract_count};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadinessState {
    Pending,
    InProgress,
    Available,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionState {
    Available,
    NotReady,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Readiness {
    Replicas(ReadinessState),
    Condition(ConditionState),
    NotApplicable,
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Readiness::Replicas(ReadinessState::Pending) => "Pending",
            Readiness::Replicas(ReadinessState::InProgress) => "InProgress",
            Readiness::Replicas(ReadinessState::Available) => "Available",
            Readiness::Condition(ConditionState::Available) => "Available",
            Readiness::Condition(ConditionState::NotReady) => "NotReady",
            Readiness::Condition(ConditionState::Unknown) => "Unknown",
            Readiness::NotApplicable => "-",
        };
        f.write_str(s)
    }
}

/// Field names carrying "desired" and "ready" counts for a replica-based kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaFields {
    pub desired: &'static str,
    /// Consulted when `desired` is absent.
    pub desired_fallback: Option<&'static str>,
    pub ready: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessRule {
    Replicas(ReplicaFields),
    Condition { condition_type: &'static str },
}

const WORKLOAD_REPLICAS: ReplicaFields = ReplicaFields {
    desired: "spec.replicas",
    desired_fallback: Some("status.replicas"),
    ready: "status.readyReplicas",
};

const DAEMONSET_REPLICAS: ReplicaFields = ReplicaFields {
    desired: "status.desiredNumberScheduled",
    desired_fallback: None,
    ready: "status.numberReady",
};

pub fn readiness_rule(kind: KnownKind) -> Option<ReadinessRule> {
    match kind {
        KnownKind::Deployments | KnownKind::StatefulSets | KnownKind::ReplicaSets => {
            Some(ReadinessRule::Replicas(WORKLOAD_REPLICAS))
        }
        KnownKind::DaemonSets => Some(ReadinessRule::Replicas(DAEMONSET_REPLICAS)),
        KnownKind::CustomResourceDefinitions => Some(ReadinessRule::Condition { condition_type: "Established" }),
        KnownKind::Nodes => Some(ReadinessRule::Condition { condition_type: "Ready" }),
        _ => None,
    }
}

/// Replica state machine.
pub fn classify(desired: u64, ready: u64) -> ReadinessState {
    if desired == 0 {
        ReadinessState::Pending
    } else if ready == desired {
        ReadinessState::Available
    } else {
        ReadinessState::InProgress
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition<'a> {
    pub type_: &'a str,
    pub status: &'a str,
}

/// `status.conditions` in document order; malformed entries are skipped.
pub fn conditions_of(doc: &Value) -> SmallVec<[Condition<'_>; 4]> {
    let mut out = SmallVec::new();
    if let Some(items) = extract(doc, "status.conditions").and_then(|v| v.as_array()) {
        for c in items {
            let type_ = c.get("type").and_then(|v| v.as_str());
            let status = c.get("status").and_then(|v| v.as_str()).unwrap_or("");
            if let Some(type_) = type_ {
                out.push(Condition { type_, status });
            }
        }
    }
    out
}

/// Condition state machine: the first condition of `condition_type` decides.
pub fn classify_condition<'a, I>(conditions: I, condition_type: &str) -> ConditionState
where
    I: IntoIterator<Item = Condition<'a>>,
{
    match conditions.into_iter().find(|c| c.type_ == condition_type) {
        Some(c) if c.status == "True" => ConditionState::Available,
        Some(_) => ConditionState::NotReady,
        None => ConditionState::Unknown,
    }
}

pub fn replica_counts(doc: &Value, fields: &ReplicaFields) -> (u64, u64) {
    let desired = match (extract(doc, fields.desired), fields.desired_fallback) {
        (Some(_), _) | (None, None) => extract_count(doc, fields.desired),
        (None, Some(fallback)) => extract_count(doc, fallback),
    };
    (desired, extract_count(doc, fields.ready))
}

/// Readiness of one document of `kind`. CRD-backed kinds have no fixed rule.
pub fn readiness(kind: &ResourceKind, doc: &Value) -> Readiness {
    let Some(rule) = kind.known().and_then(readiness_rule) else {
        return Readiness::NotApplicable;
    };
    match rule {
        ReadinessRule::Replicas(fields) => {
            let (desired, ready) = replica_counts(doc, &fields);
            Readiness::Replicas(classify(desired, ready))
        }
        ReadinessRule::Condition { condition_type } => {
            Readiness::Condition(classify_condition(conditions_of(doc), condition_type))
        }
    }
}
