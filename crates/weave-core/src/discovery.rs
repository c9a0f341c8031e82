//! Context discovery
//!
//! One generation call reports entity *names* grouped into canonical
//! clusters. Identifiers are minted locally by the [`IdentifierRegistry`], so
//! the same canonical names always yield the same identifiers regardless of
//! what the backend returned on a previous run. If the response cannot be
//! shaped, discovery fails and no context is published.

use crate::call::generate_shaped;
use crate::context::{ComponentEdge, DataFlow, EventDefinition, SharedContext, StateModel};
use crate::error::PipelineError;
use crate::prompts;
use crate::relationship::resolve_component;
use crate::shape::DiscoveryMentions;
use crate::types::SourceBundle;
use weave_gateway::{GenerationRequest, TextGenerator};
use weave_symbol::{EntityKind, IdentifierRegistry, StableId};

/// Builds the shared context from source material
#[derive(Clone, Copy)]
pub struct DiscoveryEngine<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> DiscoveryEngine<'a> {
    #[must_use]
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    /// Run discovery over `bundle`, minting into `registry`
    ///
    /// # Errors
    /// Returns [`PipelineError::DiscoveryFailed`] if the call fails or its
    /// output is not a discovery-mentions object
    pub async fn discover(
        &self,
        bundle: &SourceBundle,
        registry: &IdentifierRegistry,
    ) -> Result<SharedContext, PipelineError> {
        let images = bundle
            .seeds
            .iter()
            .flat_map(|seed| seed.images.iter().cloned())
            .collect();
        let request = GenerationRequest::new(
            prompts::DISCOVERY,
            prompts::DISCOVERY_INSTRUCTIONS,
            prompts::discovery_content(&bundle.product, &bundle.seeds, &bundle.references),
        )
        .with_images(images);

        let mentions: DiscoveryMentions = generate_shaped(self.generator, &request)
            .await
            .map_err(PipelineError::DiscoveryFailed)?;
        let ctx = build_context(&mentions, registry);
        tracing::info!(
            components = ctx.component_graph.components.len(),
            state_models = ctx.shared_contracts.state_models.len(),
            events = ctx.shared_contracts.event_registry.len(),
            terms = ctx.vocabulary.len(),
            "shared context discovered"
        );
        Ok(ctx)
    }
}

fn mint_cluster(
    registry: &IdentifierRegistry,
    kind: EntityKind,
    canonical_name: &str,
    mentions: &[String],
) -> Option<StableId> {
    let id = match registry.mint(kind, canonical_name) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(canonical_name, error = %e, "skipping cluster");
            return None;
        }
    };
    for mention in mentions {
        if let Err(e) = registry.add_alias(&id, mention) {
            tracing::debug!(%id, mention, error = %e, "ignoring mention");
        }
    }
    Some(id)
}

fn lookup(
    ctx: &SharedContext,
    registry: &IdentifierRegistry,
    owner_of: &StableId,
    name: &str,
) -> Option<StableId> {
    let resolved = resolve_component(ctx, registry, name);
    if resolved.is_none() {
        tracing::warn!(entity = %owner_of, component = name, "reference to unknown component");
    }
    resolved
}

/// Mint identifiers for every cluster and assemble the context
///
/// Components are inserted first so that owners, emitters and edges can be
/// resolved against them. References to unknown components are dropped with
/// a warning.
#[must_use]
pub fn build_context(mentions: &DiscoveryMentions, registry: &IdentifierRegistry) -> SharedContext {
    let mut ctx = SharedContext::new();

    for c in &mentions.components {
        if let Some(id) = mint_cluster(registry, EntityKind::Component, &c.canonical_name, &c.mentions) {
            ctx.upsert_component(id, &c.canonical_name, &c.evidence);
        }
    }

    for s in &mentions.state_models {
        let Some(id) = mint_cluster(registry, EntityKind::StateModel, &s.canonical_name, &s.mentions)
        else {
            continue;
        };
        let owner = s.owner.as_deref().and_then(|o| lookup(&ctx, registry, &id, o));
        let consumers = s
            .consumers
            .iter()
            .filter_map(|c| lookup(&ctx, registry, &id, c))
            .collect();
        ctx.upsert_state_model(StateModel {
            id,
            name: s.canonical_name.trim().to_string(),
            owner,
            consumers,
            evidence: s.evidence.clone(),
        });
    }

    for e in &mentions.events {
        let Some(id) = mint_cluster(registry, EntityKind::Event, &e.canonical_name, &e.mentions) else {
            continue;
        };
        let emitter = e.emitter.as_deref().and_then(|n| lookup(&ctx, registry, &id, n));
        let listeners = e
            .listeners
            .iter()
            .filter_map(|l| lookup(&ctx, registry, &id, l))
            .collect();
        ctx.upsert_event(EventDefinition {
            id,
            name: e.canonical_name.trim().to_string(),
            emitter,
            listeners,
            evidence: e.evidence.clone(),
        });
    }

    for f in &mentions.data_flows {
        let Some(id) = mint_cluster(registry, EntityKind::DataFlow, &f.canonical_name, &f.mentions) else {
            continue;
        };
        let from = f.from.as_deref().and_then(|n| lookup(&ctx, registry, &id, n));
        let to = f.to.as_deref().and_then(|n| lookup(&ctx, registry, &id, n));
        ctx.upsert_data_flow(DataFlow {
            id,
            name: f.canonical_name.trim().to_string(),
            from,
            to,
            evidence: f.evidence.clone(),
        });
    }

    for (edges, composition) in [(&mentions.composition_edges, true), (&mentions.coordination_edges, false)] {
        for edge in edges {
            let (Some(from), Some(to)) = (
                resolve_component(&ctx, registry, &edge.from),
                resolve_component(&ctx, registry, &edge.to),
            ) else {
                tracing::warn!(from = %edge.from, to = %edge.to, "dropping edge with unknown endpoint");
                continue;
            };
            let edge = ComponentEdge {
                from,
                to,
                evidence: edge.evidence.trim().to_string(),
            };
            if composition {
                ctx.add_composition_edge(edge);
            } else {
                ctx.add_coordination_edge(edge);
            }
        }
    }

    for role in &mentions.roles {
        match resolve_component(&ctx, registry, &role.component) {
            Some(id) => {
                ctx.add_role(id, &role.role);
            }
            None => tracing::warn!(component = %role.component, "dropping role of unknown component"),
        }
    }

    for state in &mentions.standard_states {
        ctx.add_standard_state(state);
    }
    for (term, canonical) in &mentions.vocabulary {
        ctx.add_term(term, canonical);
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{parse_shape, ComponentMention, StateMention};
    use crate::types::{ReferenceDoc, StorySeed};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use weave_test_utils::{fixtures, ScriptedGenerator};

    fn mentions() -> DiscoveryMentions {
        parse_shape(&fixtures::discovery_json()).unwrap()
    }

    fn id(raw: &str) -> StableId {
        raw.parse().unwrap()
    }

    #[test]
    fn builds_graph_from_names() {
        let registry = IdentifierRegistry::new();
        let ctx = build_context(&mentions(), &registry);

        assert!(ctx.has_component(&id("comp.login_form")));
        assert!(ctx.has_component(&id("comp.usage_chart")));
        let session = &ctx.shared_contracts.state_models[0];
        assert_eq!(session.id, id("state.session"));
        assert_eq!(session.owner, Some(id("comp.login_form")));
        assert_eq!(
            registry.resolve(EntityKind::Component, "sign-in form"),
            Some(id("comp.login_form"))
        );
        assert_eq!(ctx.version, 0);
    }

    #[test]
    fn unknown_owner_is_dropped_not_invented() {
        let registry = IdentifierRegistry::new();
        let mentions: DiscoveryMentions = parse_shape(
            r#"{"components": [{"canonicalName": "Header"}],
                "stateModels": [{"canonicalName": "Theme", "owner": "Settings Panel"}],
                "compositionEdges": [{"from": "Header", "to": "Footer"}]}"#,
        )
        .unwrap();
        let ctx = build_context(&mentions, &registry);

        assert_eq!(ctx.shared_contracts.state_models[0].owner, None);
        assert!(ctx.component_graph.composition_edges.is_empty());
        assert!(!registry.contains_str("comp.settings_panel"));
    }

    #[tokio::test]
    async fn unshaped_output_fails_discovery() {
        let scripted = ScriptedGenerator::new().reply(prompts::DISCOVERY, r#"{"entities": []}"#);
        let bundle = SourceBundle::new("Acme").with_seed(StorySeed::new("login", "form"));
        let registry = IdentifierRegistry::new();

        let err = DiscoveryEngine::new(&scripted)
            .discover(&bundle, &registry)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DiscoveryFailed(_)));
    }

    #[tokio::test]
    async fn content_carries_seeds_and_references() {
        let scripted = ScriptedGenerator::new().reply(prompts::DISCOVERY, fixtures::discovery_json());
        let bundle = SourceBundle::new("Acme")
            .with_seed(StorySeed::new("login", "Email and password"))
            .with_reference(ReferenceDoc::new("arch.md", "Sessions live in the auth store"));

        DiscoveryEngine::new(&scripted)
            .discover(&bundle, &IdentifierRegistry::new())
            .await
            .unwrap();

        let calls = scripted.calls_with_label(prompts::DISCOVERY);
        assert!(calls[0].content.contains("Email and password"));
        assert!(calls[0].content.contains("Sessions live in the auth store"));
    }

    const COMPONENT_NAMES: [&str; 7] = [
        "Login Form",
        "login-form",
        "LoginForm",
        "Usage Chart",
        "usage chart",
        "Session Panel",
        "Header",
    ];
    const STATE_NAMES: [&str; 4] = ["Session", "session", "Theme", "Usage Window"];
    const ALIASES: [&str; 6] = ["sign-in form", "usage view", "header", "Usage Chart", "chart", "session"];

    fn aliases() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(prop::sample::select(ALIASES.to_vec()), 0..3)
            .prop_map(|a| a.into_iter().map(str::to_string).collect())
    }

    fn clusters() -> impl Strategy<Value = (Vec<ComponentMention>, Vec<StateMention>)> {
        let components = prop::collection::vec(
            (prop::sample::select(COMPONENT_NAMES.to_vec()), aliases()),
            1..8,
        )
        .prop_map(|cs| {
            cs.into_iter()
                .map(|(name, mentions)| ComponentMention {
                    canonical_name: name.to_string(),
                    mentions,
                    evidence: Vec::new(),
                })
                .collect()
        });
        let states = prop::collection::vec(
            (
                prop::sample::select(STATE_NAMES.to_vec()),
                aliases(),
                prop::sample::select(COMPONENT_NAMES.to_vec()),
            ),
            0..5,
        )
        .prop_map(|ss| {
            ss.into_iter()
                .map(|(name, mentions, owner)| StateMention {
                    canonical_name: name.to_string(),
                    mentions,
                    evidence: Vec::new(),
                    owner: Some(owner.to_string()),
                    consumers: Vec::new(),
                })
                .collect()
        });
        (components, states)
    }

    fn discovered(components: Vec<ComponentMention>, state_models: Vec<StateMention>) -> DiscoveryMentions {
        DiscoveryMentions {
            components,
            state_models,
            ..DiscoveryMentions::default()
        }
    }

    proptest! {
        #[test]
        fn minting_is_order_independent(
            (components, states, shuffled_components, shuffled_states) in clusters().prop_flat_map(|(cs, ss)| {
                (Just(cs.clone()), Just(ss.clone()), Just(cs).prop_shuffle(), Just(ss).prop_shuffle())
            })
        ) {
            let first = IdentifierRegistry::new();
            let second = IdentifierRegistry::new();
            let a = build_context(&discovered(components, states), &first);
            let b = build_context(&discovered(shuffled_components, shuffled_states), &second);

            prop_assert_eq!(first.snapshot(), second.snapshot());
            for name in COMPONENT_NAMES.iter().chain(&ALIASES) {
                prop_assert_eq!(
                    first.resolve(EntityKind::Component, name),
                    second.resolve(EntityKind::Component, name)
                );
            }
            prop_assert_eq!(
                a.component_graph.components.keys().collect::<Vec<_>>(),
                b.component_graph.components.keys().collect::<Vec<_>>()
            );
            let state_ids = |ctx: &SharedContext| {
                ctx.shared_contracts.state_models.iter().map(|m| m.id.clone()).collect::<Vec<_>>()
            };
            prop_assert_eq!(state_ids(&a), state_ids(&b));
        }
    }

    #[test]
    fn minting_is_stable_across_runs() {
        let first = IdentifierRegistry::new();
        let second = IdentifierRegistry::new();
        let a = build_context(&mentions(), &first);
        let b = build_context(&mentions(), &second);

        assert_eq!(first.snapshot(), second.snapshot());
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }
}
