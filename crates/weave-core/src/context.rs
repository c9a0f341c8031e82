//! Shared context
//!
//! The cross-story graph of components, state, events and vocabulary.
//! Created by discovery and mutated only by the orchestrator between rounds;
//! every other stage reads a point-in-time snapshot.
//!
//! Every identifier stored here was minted by the identifier registry.
//! Owner, emitter and endpoint references are best-effort: a reference that
//! cannot be resolved to a known component is left empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use weave_artifact::{ContentHash, HashError};
use weave_symbol::StableId;

/// UI or service component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: StableId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

/// Directed component edge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentEdge {
    pub from: StableId,
    pub to: StableId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub evidence: String,
}

/// Components and how they compose and coordinate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentGraph {
    pub components: BTreeMap<StableId, Component>,
    pub composition_edges: Vec<ComponentEdge>,
    pub coordination_edges: Vec<ComponentEdge>,
}

/// Owned state model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateModel {
    pub id: StableId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<StableId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumers: Vec<StableId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

/// Registered event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDefinition {
    pub id: StableId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitter: Option<StableId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<StableId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

/// Data flow between components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlow {
    pub id: StableId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<StableId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<StableId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

/// Contracts shared across stories
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedContracts {
    pub state_models: Vec<StateModel>,
    pub event_registry: Vec<EventDefinition>,
    pub standard_states: Vec<String>,
    pub data_flows: Vec<DataFlow>,
}

/// Role a component plays
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRole {
    pub component: StableId,
    pub role: String,
}

/// Versioned shared context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedContext {
    pub component_graph: ComponentGraph,
    pub shared_contracts: SharedContracts,
    pub component_roles: Vec<ComponentRole>,
    pub vocabulary: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

/// Digest input: everything except the timestamp
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DigestView<'a> {
    component_graph: &'a ComponentGraph,
    shared_contracts: &'a SharedContracts,
    component_roles: &'a [ComponentRole],
    vocabulary: &'a BTreeMap<String, String>,
}

fn push_evidence(target: &mut Vec<String>, evidence: &[String]) -> bool {
    let mut changed = false;
    for e in evidence {
        let e = e.trim();
        if !e.is_empty() && !target.iter().any(|existing| existing == e) {
            target.push(e.to_string());
            changed = true;
        }
    }
    changed
}

/// Insert into a list kept sorted by id, merging on collision
fn upsert_sorted<T>(
    list: &mut Vec<T>,
    item: T,
    id: impl Fn(&T) -> &StableId,
    merge: impl FnOnce(&mut T, T) -> bool,
) -> bool {
    let found = list.binary_search_by(|probe| id(probe).cmp(id(&item)));
    match found {
        Ok(pos) => merge(&mut list[pos], item),
        Err(pos) => {
            list.insert(pos, item);
            true
        }
    }
}

impl Default for SharedContext {
    fn default() -> Self {
        Self {
            component_graph: ComponentGraph::default(),
            shared_contracts: SharedContracts::default(),
            component_roles: Vec::new(),
            vocabulary: BTreeMap::new(),
            timestamp: Utc::now(),
            version: 0,
        }
    }
}

impl SharedContext {
    /// Create empty context at version 0
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Content digest excluding the timestamp
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn digest(&self) -> Result<ContentHash, HashError> {
        ContentHash::compute_serializable(&DigestView {
            component_graph: &self.component_graph,
            shared_contracts: &self.shared_contracts,
            component_roles: &self.component_roles,
            vocabulary: &self.vocabulary,
        })
    }

    /// Mark a committed mutation batch
    pub fn bump_version(&mut self) {
        self.version += 1;
        self.timestamp = Utc::now();
    }

    /// Whether a component id is in the graph
    #[inline]
    #[must_use]
    pub fn has_component(&self, id: &StableId) -> bool {
        self.component_graph.components.contains_key(id)
    }

    /// Every state and event id
    #[must_use]
    pub fn contract_ids(&self) -> BTreeSet<StableId> {
        let contracts = &self.shared_contracts;
        contracts
            .state_models
            .iter()
            .map(|s| s.id.clone())
            .chain(contracts.event_registry.iter().map(|e| e.id.clone()))
            .collect()
    }

    /// Insert a component or merge its evidence; returns whether anything changed
    pub fn upsert_component(&mut self, id: StableId, name: &str, evidence: &[String]) -> bool {
        match self.component_graph.components.get_mut(&id) {
            Some(existing) => push_evidence(&mut existing.evidence, evidence),
            None => {
                let mut component = Component {
                    id: id.clone(),
                    name: name.trim().to_string(),
                    evidence: Vec::new(),
                };
                push_evidence(&mut component.evidence, evidence);
                self.component_graph.components.insert(id, component);
                true
            }
        }
    }

    /// Insert a state model or merge into the existing one
    pub fn upsert_state_model(&mut self, model: StateModel) -> bool {
        upsert_sorted(
            &mut self.shared_contracts.state_models,
            model,
            |m| &m.id,
            |existing, new| {
                let mut changed = push_evidence(&mut existing.evidence, &new.evidence);
                if existing.owner.is_none() && new.owner.is_some() {
                    existing.owner = new.owner;
                    changed = true;
                }
                for consumer in new.consumers {
                    if !existing.consumers.contains(&consumer) {
                        existing.consumers.push(consumer);
                        changed = true;
                    }
                }
                changed
            },
        )
    }

    /// Insert an event or merge into the existing one
    pub fn upsert_event(&mut self, event: EventDefinition) -> bool {
        upsert_sorted(
            &mut self.shared_contracts.event_registry,
            event,
            |e| &e.id,
            |existing, new| {
                let mut changed = push_evidence(&mut existing.evidence, &new.evidence);
                if existing.emitter.is_none() && new.emitter.is_some() {
                    existing.emitter = new.emitter;
                    changed = true;
                }
                for listener in new.listeners {
                    if !existing.listeners.contains(&listener) {
                        existing.listeners.push(listener);
                        changed = true;
                    }
                }
                changed
            },
        )
    }

    /// Insert a data flow or merge into the existing one
    pub fn upsert_data_flow(&mut self, flow: DataFlow) -> bool {
        upsert_sorted(
            &mut self.shared_contracts.data_flows,
            flow,
            |f| &f.id,
            |existing, new| {
                let mut changed = push_evidence(&mut existing.evidence, &new.evidence);
                if existing.from.is_none() && new.from.is_some() {
                    existing.from = new.from;
                    changed = true;
                }
                if existing.to.is_none() && new.to.is_some() {
                    existing.to = new.to;
                    changed = true;
                }
                changed
            },
        )
    }

    /// Add a parent/child composition edge
    pub fn add_composition_edge(&mut self, edge: ComponentEdge) -> bool {
        insert_edge(&mut self.component_graph.composition_edges, edge)
    }

    /// Add a coordination edge
    pub fn add_coordination_edge(&mut self, edge: ComponentEdge) -> bool {
        insert_edge(&mut self.component_graph.coordination_edges, edge)
    }

    /// Record a component role
    pub fn add_role(&mut self, component: StableId, role: &str) -> bool {
        let role = ComponentRole {
            component,
            role: role.trim().to_string(),
        };
        match self.component_roles.binary_search(&role) {
            Ok(_) => false,
            Err(pos) => {
                self.component_roles.insert(pos, role);
                true
            }
        }
    }

    /// Add a standard UI state name
    pub fn add_standard_state(&mut self, state: &str) -> bool {
        let state = state.trim().to_lowercase();
        if state.is_empty() || self.shared_contracts.standard_states.contains(&state) {
            return false;
        }
        self.shared_contracts.standard_states.push(state);
        self.shared_contracts.standard_states.sort();
        true
    }

    /// Record a vocabulary mapping; the first canonical term wins
    pub fn add_term(&mut self, term: &str, canonical: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() || self.vocabulary.contains_key(&term) {
            return false;
        }
        self.vocabulary.insert(term, canonical.trim().to_string());
        true
    }
}

/// Insert an edge unless one with the same endpoints exists; keeps edges sorted
fn insert_edge(edges: &mut Vec<ComponentEdge>, edge: ComponentEdge) -> bool {
    if edges.iter().any(|e| e.from == edge.from && e.to == edge.to) {
        return false;
    }
    let pos = edges.partition_point(|e| (&e.from, &e.to) < (&edge.from, &edge.to));
    edges.insert(pos, edge);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_symbol::EntityKind;

    fn id(kind: EntityKind, name: &str) -> StableId {
        StableId::derive(kind, name).unwrap()
    }

    #[test]
    fn digest_ignores_timestamp() {
        let mut a = SharedContext::new();
        a.upsert_component(id(EntityKind::Component, "Login Form"), "Login Form", &[]);
        let mut b = a.clone();
        b.timestamp = a.timestamp + chrono::Duration::hours(1);
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());

        b.add_term("sign in", "login");
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn upserts_report_changes() {
        let mut ctx = SharedContext::new();
        let form = id(EntityKind::Component, "Login Form");
        assert!(ctx.upsert_component(form.clone(), "Login Form", &["mockup 1".into()]));
        assert!(!ctx.upsert_component(form.clone(), "Login Form", &["mockup 1".into()]));
        assert!(ctx.upsert_component(form.clone(), "Login Form", &["mockup 2".into()]));

        let session = StateModel {
            id: id(EntityKind::StateModel, "Session"),
            name: "Session".into(),
            owner: None,
            consumers: vec![],
            evidence: vec![],
        };
        assert!(ctx.upsert_state_model(session.clone()));
        assert!(!ctx.upsert_state_model(session.clone()));
        assert!(ctx.upsert_state_model(StateModel {
            owner: Some(form),
            ..session
        }));
        assert_eq!(ctx.contract_ids().len(), 1);
    }

    #[test]
    fn lists_stay_sorted_by_id() {
        let mut ctx = SharedContext::new();
        for name in ["Zeta", "Alpha", "Mid"] {
            ctx.upsert_event(EventDefinition {
                id: id(EntityKind::Event, name),
                name: name.into(),
                emitter: None,
                listeners: vec![],
                evidence: vec![],
            });
        }
        let ids: Vec<_> = ctx
            .shared_contracts
            .event_registry
            .iter()
            .map(|e| e.id.to_string())
            .collect();
        assert_eq!(ids, ["event.alpha", "event.mid", "event.zeta"]);
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let mut ctx = SharedContext::new();
        let edge = ComponentEdge {
            from: id(EntityKind::Component, "Dashboard"),
            to: id(EntityKind::Component, "Usage Chart"),
            evidence: String::new(),
        };
        assert!(ctx.add_composition_edge(edge.clone()));
        assert!(!ctx.add_composition_edge(edge));
    }

    #[test]
    fn serializes_with_wire_names() {
        let mut ctx = SharedContext::new();
        ctx.add_standard_state("Loading");
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json["componentGraph"]["compositionEdges"].is_array());
        assert_eq!(json["sharedContracts"]["standardStates"][0], "loading");
        assert_eq!(json["version"], 0);
    }
}
