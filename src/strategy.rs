//! Strategy routing and per-strategy parameter table

use crate::types::*;
use std::collections::BTreeMap;

/// Domain confidence at or above which a lone domain routes to `Focused`
pub const HIGH_DOMAIN_CONFIDENCE: f32 = 0.7;

/// Relevance floor `Focused` retrieval never goes below
pub const FOCUSED_MIN_FLOOR: f32 = 0.8;

const BROADEN_EXTRA_SOURCES: usize = 4;
const BROADEN_FLOOR_STEP: f32 = 0.15;
const MIN_FLOOR: f32 = 0.1;

/// Parameter table; the match keeps every strategy covered at compile time
pub fn params_for(strategy: Strategy) -> StrategyParams {
    match strategy {
        Strategy::Quick => StrategyParams {
            max_sources: 3,
            retrieval_mode: RetrievalMode::Semantic,
            relevance_floor: 0.5,
            use_secondary_sources: false,
            diversify_by_source: false,
        },
        Strategy::Comprehensive => StrategyParams {
            max_sources: 8,
            retrieval_mode: RetrievalMode::Hybrid,
            relevance_floor: 0.4,
            use_secondary_sources: true,
            diversify_by_source: false,
        },
        Strategy::Focused => StrategyParams {
            max_sources: 4,
            retrieval_mode: RetrievalMode::Hybrid,
            relevance_floor: FOCUSED_MIN_FLOOR,
            use_secondary_sources: false,
            diversify_by_source: false,
        },
        Strategy::Exploratory => StrategyParams {
            max_sources: 12,
            retrieval_mode: RetrievalMode::Hybrid,
            relevance_floor: 0.3,
            use_secondary_sources: true,
            diversify_by_source: true,
        },
    }
}

/// Routing policy used both by the analyzer (recommendation) and the router
pub fn recommend(
    domain_confidence: &BTreeMap<Domain, f32>,
    complexity: Complexity,
    urgency: Urgency,
) -> Strategy {
    let domain_count = domain_confidence.len();

    if complexity == Complexity::Low && urgency == Urgency::High {
        return Strategy::Quick;
    }
    if complexity == Complexity::High && domain_count > 1 {
        return Strategy::Exploratory;
    }
    if domain_count == 1
        && domain_confidence
            .iter()
            .any(|(d, c)| *d != Domain::GeneralLegal && *c >= HIGH_DOMAIN_CONFIDENCE)
    {
        return Strategy::Focused;
    }
    Strategy::Comprehensive
}

/// Resolved strategy plus the concrete parameters one attempt runs with
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    pub strategy: Strategy,
    pub params: StrategyParams,
    pub explicit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StrategyRouter;

impl StrategyRouter {
    pub fn new() -> Self {
        Self
    }

    /// Explicit override always wins; otherwise the blueprint decides
    pub fn route(&self, blueprint: &ContextBlueprint, explicit: Option<Strategy>) -> RoutePlan {
        let strategy = explicit.unwrap_or_else(|| {
            recommend(&blueprint.domain_confidence, blueprint.complexity, blueprint.urgency)
        });
        RoutePlan {
            strategy,
            params: params_for(strategy),
            explicit: explicit.is_some(),
        }
    }

    /// Parameters for a retry: escalate toward `Comprehensive`, widen the
    /// source cap and lower the floor. Explicitly requested strategies are
    /// kept; `Focused` never drops below its precision floor.
    pub fn broaden(&self, plan: &RoutePlan) -> RoutePlan {
        let strategy = if plan.explicit {
            plan.strategy
        } else {
            match plan.strategy {
                Strategy::Quick | Strategy::Focused | Strategy::Comprehensive => Strategy::Comprehensive,
                Strategy::Exploratory => Strategy::Exploratory,
            }
        };

        let base = params_for(strategy);
        let mut params = StrategyParams {
            max_sources: base.max_sources.max(plan.params.max_sources) + BROADEN_EXTRA_SOURCES,
            relevance_floor: (plan.params.relevance_floor.min(base.relevance_floor) - BROADEN_FLOOR_STEP)
                .max(MIN_FLOOR),
            use_secondary_sources: base.use_secondary_sources || plan.params.use_secondary_sources,
            retrieval_mode: RetrievalMode::Hybrid,
            diversify_by_source: base.diversify_by_source,
        };
        if strategy == Strategy::Focused {
            params.relevance_floor = params.relevance_floor.max(FOCUSED_MIN_FLOOR);
        }

        RoutePlan {
            strategy,
            params,
            explicit: plan.explicit,
        }
    }
}
