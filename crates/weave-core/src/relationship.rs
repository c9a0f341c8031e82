//! Relationship proposals and their application to shared context
//!
//! The judge proposes context mutations alongside its verdict. Only
//! proposals at or above the merge-confidence threshold are applied; the rest
//! are discarded, never queued. Application is by operation:
//!
//! - `add_node`: mint an identifier for the named entity and insert it
//! - `add_edge`: composition / coordination edge between two known
//!   components, a data flow, or a consumer / listener link
//! - `edit_node` / `edit_edge`: append evidence to an existing entry
//!
//! A proposal naming an endpoint that does not resolve to a known component
//! is rejected with a warning.

use crate::context::{ComponentEdge, DataFlow, EventDefinition, SharedContext, StateModel};
use serde::{Deserialize, Serialize};
use weave_symbol::{EntityKind, IdentifierError, IdentifierRegistry, StableId};

/// What a relationship talks about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    Component,
    StateModel,
    Event,
    DataFlow,
    Composition,
    Coordination,
}

/// Requested graph operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipOp {
    AddNode,
    AddEdge,
    EditNode,
    EditEdge,
}

/// Proposed context mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    /// Proposal id, used to look up its confidence
    #[serde(default)]
    pub id: String,
    pub kind: RelationshipKind,
    pub operation: RelationshipOp,
    /// Entity name (nodes) or label (edges)
    #[serde(default)]
    pub name: String,
    /// Source component name or id (edges, owners, emitters)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Target component name or id (edges, consumers, listeners)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub evidence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Relationship {
    /// Confidence, zero when the model gave none
    #[inline]
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence.unwrap_or(0.0)
    }
}

/// Why a relationship could not be applied
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelationshipError {
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("relationship is missing its '{0}' field")]
    MissingField(&'static str),

    #[error("{op:?} is not supported for {kind:?}")]
    Unsupported {
        kind: RelationshipKind,
        op: RelationshipOp,
    },

    #[error(transparent)]
    Identifier(#[from] IdentifierError),
}

/// Result of merging one batch of proposals
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Proposals that changed the context
    pub applied: usize,
    /// Accepted proposals that were already reflected in the context
    pub unchanged: usize,
    /// Below the confidence threshold
    pub below_threshold: usize,
    /// Accepted but not applicable
    pub rejected: Vec<(String, RelationshipError)>,
}

impl MergeOutcome {
    /// Whether the context changed
    #[inline]
    #[must_use]
    pub fn changed(&self) -> bool {
        self.applied > 0
    }
}

/// Merge proposals at or above `threshold` into `ctx`
///
/// Does not bump the context version; the caller commits the batch.
pub fn merge_relationships(
    ctx: &mut SharedContext,
    registry: &IdentifierRegistry,
    relationships: &[Relationship],
    threshold: f64,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    for rel in relationships {
        if rel.confidence() < threshold {
            tracing::warn!(
                relationship = %rel.id,
                confidence = rel.confidence(),
                threshold,
                "discarding low-confidence relationship"
            );
            outcome.below_threshold += 1;
            continue;
        }
        match apply_relationship(ctx, registry, rel) {
            Ok(true) => outcome.applied += 1,
            Ok(false) => outcome.unchanged += 1,
            Err(e) => {
                tracing::warn!(relationship = %rel.id, error = %e, "rejecting relationship");
                outcome.rejected.push((rel.id.clone(), e));
            }
        }
    }
    outcome
}

/// Resolve a component reference (name, alias or stable id) present in `ctx`
#[must_use]
pub fn resolve_component(
    ctx: &SharedContext,
    registry: &IdentifierRegistry,
    reference: &str,
) -> Option<StableId> {
    reference
        .parse::<StableId>()
        .ok()
        .filter(|id| id.kind() == EntityKind::Component)
        .or_else(|| registry.resolve(EntityKind::Component, reference))
        .filter(|id| ctx.has_component(id))
}

fn require_component(
    ctx: &SharedContext,
    registry: &IdentifierRegistry,
    reference: Option<&str>,
    field: &'static str,
) -> Result<StableId, RelationshipError> {
    let reference = reference.ok_or(RelationshipError::MissingField(field))?;
    resolve_component(ctx, registry, reference)
        .ok_or_else(|| RelationshipError::UnknownEndpoint(reference.to_string()))
}

fn optional_component(
    ctx: &SharedContext,
    registry: &IdentifierRegistry,
    reference: Option<&str>,
) -> Result<Option<StableId>, RelationshipError> {
    reference
        .map(|r| {
            resolve_component(ctx, registry, r)
                .ok_or_else(|| RelationshipError::UnknownEndpoint(r.to_string()))
        })
        .transpose()
}

fn evidence(rel: &Relationship) -> Vec<String> {
    if rel.evidence.trim().is_empty() {
        Vec::new()
    } else {
        vec![rel.evidence.trim().to_string()]
    }
}

fn node_kind(kind: RelationshipKind) -> Option<EntityKind> {
    match kind {
        RelationshipKind::Component => Some(EntityKind::Component),
        RelationshipKind::StateModel => Some(EntityKind::StateModel),
        RelationshipKind::Event => Some(EntityKind::Event),
        RelationshipKind::DataFlow => Some(EntityKind::DataFlow),
        RelationshipKind::Composition | RelationshipKind::Coordination => None,
    }
}

/// Apply one relationship; returns whether the context changed
///
/// # Errors
/// Returns error if an endpoint is unknown or the kind/operation pair is
/// unsupported
pub fn apply_relationship(
    ctx: &mut SharedContext,
    registry: &IdentifierRegistry,
    rel: &Relationship,
) -> Result<bool, RelationshipError> {
    use RelationshipKind as K;
    use RelationshipOp as Op;

    let unsupported = || RelationshipError::Unsupported {
        kind: rel.kind,
        op: rel.operation,
    };

    match (rel.operation, rel.kind) {
        (Op::AddNode, K::Component) => {
            let id = registry.mint(EntityKind::Component, &rel.name)?;
            Ok(ctx.upsert_component(id, &rel.name, &evidence(rel)))
        }
        (Op::AddNode, K::StateModel) => {
            let owner = optional_component(ctx, registry, rel.from.as_deref())?;
            let consumers = optional_component(ctx, registry, rel.to.as_deref())?;
            let id = registry.mint(EntityKind::StateModel, &rel.name)?;
            Ok(ctx.upsert_state_model(StateModel {
                id,
                name: rel.name.trim().to_string(),
                owner,
                consumers: consumers.into_iter().collect(),
                evidence: evidence(rel),
            }))
        }
        (Op::AddNode, K::Event) => {
            let emitter = optional_component(ctx, registry, rel.from.as_deref())?;
            let listeners = optional_component(ctx, registry, rel.to.as_deref())?;
            let id = registry.mint(EntityKind::Event, &rel.name)?;
            Ok(ctx.upsert_event(EventDefinition {
                id,
                name: rel.name.trim().to_string(),
                emitter,
                listeners: listeners.into_iter().collect(),
                evidence: evidence(rel),
            }))
        }
        (Op::AddNode | Op::AddEdge, K::DataFlow) => {
            let (from, to) = if rel.operation == Op::AddEdge {
                (
                    Some(require_component(ctx, registry, rel.from.as_deref(), "from")?),
                    Some(require_component(ctx, registry, rel.to.as_deref(), "to")?),
                )
            } else {
                (
                    optional_component(ctx, registry, rel.from.as_deref())?,
                    optional_component(ctx, registry, rel.to.as_deref())?,
                )
            };
            let id = registry.mint(EntityKind::DataFlow, &rel.name)?;
            Ok(ctx.upsert_data_flow(DataFlow {
                id,
                name: rel.name.trim().to_string(),
                from,
                to,
                evidence: evidence(rel),
            }))
        }
        (Op::AddEdge, K::Composition | K::Coordination) => {
            let edge = ComponentEdge {
                from: require_component(ctx, registry, rel.from.as_deref(), "from")?,
                to: require_component(ctx, registry, rel.to.as_deref(), "to")?,
                evidence: rel.evidence.trim().to_string(),
            };
            Ok(if rel.kind == K::Composition {
                ctx.add_composition_edge(edge)
            } else {
                ctx.add_coordination_edge(edge)
            })
        }
        (Op::AddEdge, K::StateModel) => {
            let consumer = require_component(ctx, registry, rel.to.as_deref(), "to")?;
            let id = existing_node(ctx, registry, EntityKind::StateModel, &rel.name)?;
            let Some(model) = ctx.shared_contracts.state_models.iter_mut().find(|m| m.id == id) else {
                return Err(RelationshipError::UnknownEndpoint(rel.name.clone()));
            };
            if model.consumers.contains(&consumer) {
                return Ok(false);
            }
            model.consumers.push(consumer);
            Ok(true)
        }
        (Op::AddEdge, K::Event) => {
            let listener = require_component(ctx, registry, rel.to.as_deref(), "to")?;
            let id = existing_node(ctx, registry, EntityKind::Event, &rel.name)?;
            let Some(event) = ctx.shared_contracts.event_registry.iter_mut().find(|e| e.id == id) else {
                return Err(RelationshipError::UnknownEndpoint(rel.name.clone()));
            };
            if event.listeners.contains(&listener) {
                return Ok(false);
            }
            event.listeners.push(listener);
            Ok(true)
        }
        (Op::EditNode, kind) => {
            let entity = node_kind(kind).ok_or_else(unsupported)?;
            let id = existing_node(ctx, registry, entity, &rel.name)?;
            let evidence = evidence(rel);
            let changed = match entity {
                EntityKind::Component => ctx.upsert_component(id, &rel.name, &evidence),
                EntityKind::StateModel => ctx.upsert_state_model(StateModel {
                    id,
                    name: rel.name.clone(),
                    owner: None,
                    consumers: Vec::new(),
                    evidence,
                }),
                EntityKind::Event => ctx.upsert_event(EventDefinition {
                    id,
                    name: rel.name.clone(),
                    emitter: None,
                    listeners: Vec::new(),
                    evidence,
                }),
                _ => ctx.upsert_data_flow(DataFlow {
                    id,
                    name: rel.name.clone(),
                    from: None,
                    to: None,
                    evidence,
                }),
            };
            Ok(changed)
        }
        (Op::EditEdge, K::Composition | K::Coordination) => {
            let from = require_component(ctx, registry, rel.from.as_deref(), "from")?;
            let to = require_component(ctx, registry, rel.to.as_deref(), "to")?;
            let edges = if rel.kind == K::Composition {
                &mut ctx.component_graph.composition_edges
            } else {
                &mut ctx.component_graph.coordination_edges
            };
            let edge = edges
                .iter_mut()
                .find(|e| e.from == from && e.to == to)
                .ok_or_else(|| RelationshipError::UnknownEndpoint(format!("{from} -> {to}")))?;
            let new_evidence = rel.evidence.trim();
            if new_evidence.is_empty() || edge.evidence == new_evidence {
                return Ok(false);
            }
            edge.evidence = new_evidence.to_string();
            Ok(true)
        }
        (Op::EditEdge, K::DataFlow) => {
            let id = existing_node(ctx, registry, EntityKind::DataFlow, &rel.name)?;
            Ok(ctx.upsert_data_flow(DataFlow {
                id,
                name: rel.name.clone(),
                from: None,
                to: None,
                evidence: evidence(rel),
            }))
        }
        _ => Err(unsupported()),
    }
}

/// Identifier of an entity already present in the context
fn existing_node(
    ctx: &SharedContext,
    registry: &IdentifierRegistry,
    kind: EntityKind,
    name: &str,
) -> Result<StableId, RelationshipError> {
    let unknown = || RelationshipError::UnknownEndpoint(name.to_string());
    let id = name
        .parse::<StableId>()
        .ok()
        .filter(|id| id.kind() == kind)
        .or_else(|| registry.resolve(kind, name))
        .ok_or_else(unknown)?;
    let contracts = &ctx.shared_contracts;
    let present = match kind {
        EntityKind::Component => ctx.has_component(&id),
        EntityKind::StateModel => contracts.state_models.iter().any(|m| m.id == id),
        EntityKind::Event => contracts.event_registry.iter().any(|e| e.id == id),
        EntityKind::DataFlow => contracts.data_flows.iter().any(|f| f.id == id),
        EntityKind::Role | EntityKind::Story => false,
    };
    if present {
        Ok(id)
    } else {
        Err(unknown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(kind: RelationshipKind, operation: RelationshipOp, name: &str) -> Relationship {
        Relationship {
            id: format!("rel-{name}"),
            kind,
            operation,
            name: name.to_string(),
            from: None,
            to: None,
            evidence: "judge".into(),
            confidence: Some(0.9),
        }
    }

    fn seeded() -> (SharedContext, IdentifierRegistry) {
        let registry = IdentifierRegistry::new();
        let mut ctx = SharedContext::new();
        for name in ["Dashboard", "Usage Chart", "Login Form"] {
            let id = registry.mint(EntityKind::Component, name).unwrap();
            ctx.upsert_component(id, name, &[]);
        }
        (ctx, registry)
    }

    #[test]
    fn add_node_mints_identifier() {
        let (mut ctx, registry) = seeded();
        let mut r = rel(RelationshipKind::Event, RelationshipOp::AddNode, "Usage Refreshed");
        r.from = Some("Usage Chart".into());

        assert!(apply_relationship(&mut ctx, &registry, &r).unwrap());
        let event = &ctx.shared_contracts.event_registry[0];
        assert_eq!(event.id.to_string(), "event.usage_refreshed");
        assert_eq!(event.emitter.as_ref().unwrap().to_string(), "comp.usage_chart");
        assert!(registry.contains_str("event.usage_refreshed"));
        assert!(!apply_relationship(&mut ctx, &registry, &r).unwrap());
    }

    #[test]
    fn add_edge_requires_known_components() {
        let (mut ctx, registry) = seeded();
        let mut r = rel(RelationshipKind::Composition, RelationshipOp::AddEdge, "contains");
        r.from = Some("comp.dashboard".into());
        r.to = Some("usage chart".into());
        assert!(apply_relationship(&mut ctx, &registry, &r).unwrap());
        assert_eq!(ctx.component_graph.composition_edges.len(), 1);

        r.to = Some("Billing Panel".into());
        assert_eq!(
            apply_relationship(&mut ctx, &registry, &r),
            Err(RelationshipError::UnknownEndpoint("Billing Panel".into()))
        );
    }

    #[test]
    fn edit_edge_updates_evidence() {
        let (mut ctx, registry) = seeded();
        let mut add = rel(RelationshipKind::Coordination, RelationshipOp::AddEdge, "sync");
        add.from = Some("Login Form".into());
        add.to = Some("Dashboard".into());
        apply_relationship(&mut ctx, &registry, &add).unwrap();

        let mut edit = add.clone();
        edit.operation = RelationshipOp::EditEdge;
        edit.evidence = "redirects after login".into();
        assert!(apply_relationship(&mut ctx, &registry, &edit).unwrap());
        assert_eq!(
            ctx.component_graph.coordination_edges[0].evidence,
            "redirects after login"
        );
    }

    #[test]
    fn edit_node_on_missing_entity_is_rejected() {
        let (mut ctx, registry) = seeded();
        let r = rel(RelationshipKind::StateModel, RelationshipOp::EditNode, "Session");
        assert!(matches!(
            apply_relationship(&mut ctx, &registry, &r),
            Err(RelationshipError::UnknownEndpoint(_))
        ));
    }

    #[test]
    fn merge_gates_on_confidence() {
        let (mut ctx, registry) = seeded();
        let mut low = rel(RelationshipKind::Component, RelationshipOp::AddNode, "Sidebar");
        low.confidence = Some(0.5);
        let high = rel(RelationshipKind::Component, RelationshipOp::AddNode, "Header");
        let mut none = rel(RelationshipKind::Component, RelationshipOp::AddNode, "Footer");
        none.confidence = None;

        let outcome = merge_relationships(&mut ctx, &registry, &[low, high, none], 0.8);
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.below_threshold, 2);
        assert!(outcome.changed());
        assert_eq!(ctx.component_graph.components.len(), 4);
        assert!(registry.resolve(EntityKind::Component, "Sidebar").is_none());
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        let (mut ctx, registry) = seeded();
        let r = rel(RelationshipKind::Component, RelationshipOp::AddEdge, "x");
        assert!(matches!(
            apply_relationship(&mut ctx, &registry, &r),
            Err(RelationshipError::Unsupported { .. })
        ));
    }
}
