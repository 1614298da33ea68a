use crate::GenerationMode;

/// Structural bounds a generated graph must respect for a given mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeConstraints {
    pub min_components: usize,
    pub max_components: usize,
    pub require_cdn: bool,
    pub require_load_balancer: bool,
    pub require_observability: bool,
}

const MODE_TABLE: [(GenerationMode, ModeConstraints); 3] = [
    (
        GenerationMode::Startup,
        ModeConstraints {
            min_components: 3,
            max_components: 8,
            require_cdn: false,
            require_load_balancer: false,
            require_observability: false,
        },
    ),
    (
        GenerationMode::Default,
        ModeConstraints {
            min_components: 5,
            max_components: 12,
            require_cdn: false,
            require_load_balancer: false,
            require_observability: true,
        },
    ),
    (
        GenerationMode::Enterprise,
        ModeConstraints {
            min_components: 10,
            max_components: 25,
            require_cdn: true,
            require_load_balancer: true,
            require_observability: true,
        },
    ),
];

pub fn mode_constraints(mode: GenerationMode) -> ModeConstraints {
    MODE_TABLE
        .iter()
        .find(|(m, _)| *m == mode)
        .map(|(_, c)| *c)
        .unwrap_or(MODE_TABLE[1].1)
}

/// A pair of technologies that must never appear in the same graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Incompatibility {
    pub first: &'static str,
    pub second: &'static str,
    pub reason: &'static str,
}

pub const INCOMPATIBLE_FRAMEWORKS: &[Incompatibility] = &[
    Incompatibility {
        first: "Next.js",
        second: "Create React App",
        reason: "both own the React build and routing pipeline",
    },
    Incompatibility {
        first: "Next.js",
        second: "Nuxt",
        reason: "React and Vue meta-frameworks cannot share one frontend",
    },
    Incompatibility {
        first: "React",
        second: "Angular",
        reason: "two competing SPA frameworks in one frontend",
    },
    Incompatibility {
        first: "React",
        second: "Vue",
        reason: "two competing SPA frameworks in one frontend",
    },
    Incompatibility {
        first: "Django",
        second: "Flask",
        reason: "two Python web frameworks for the same service",
    },
    Incompatibility {
        first: "Django",
        second: "Ruby on Rails",
        reason: "two full-stack frameworks for the same backend",
    },
    Incompatibility {
        first: "Express",
        second: "Fastify",
        reason: "two Node.js HTTP frameworks for the same service",
    },
    Incompatibility {
        first: "Spring Boot",
        second: "Express",
        reason: "a single backend service has one runtime",
    },
    Incompatibility {
        first: "Firebase Realtime Database",
        second: "Firestore",
        reason: "duplicate Firebase document stores for the same data",
    },
    Incompatibility {
        first: "Supabase Auth",
        second: "Firebase Auth",
        reason: "two identity providers for the same user base",
    },
];

/// Architecture rules embedded in every generation prompt and served by the
/// MCP `get_rules` tool.
pub const RULES: &str = "\
1. One node per deployable or addressable thing. Do not duplicate a component to show it twice.\n\
2. Edges point from the caller to the dependency (\"Web App\" -> \"API\" -> \"Database\"). \
Never add reverse \"response\" edges.\n\
3. Frontends never talk to databases directly. Put an API, backend or gateway in between.\n\
4. Queues, topics and event buses are their own nodes. Model A -> Queue -> B, not A -> B with a \"via queue\" label.\n\
5. Every edge's source and target must be the id of a node in the same response.\n\
6. Node labels name roles (\"Order Service\", \"Checkout UI\"), not technology stacks. \
The technology belongs in `tech`.\n\
7. `type` and `serviceType` use the same vocabulary. Pick the one that describes the node's job.\n\
8. Edge protocols describe the transport actually used (https for browser traffic, grpc for \
internal RPC, queue for broker traffic, database for data-store connections).\n\
9. Cost estimates are monthly USD figures for a modest production deployment; omit them when unknown.\n\
10. Positions lay the graph out left to right by request flow, roughly 250px apart.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_grow_with_scale() {
        let startup = mode_constraints(GenerationMode::Startup);
        let default = mode_constraints(GenerationMode::Default);
        let enterprise = mode_constraints(GenerationMode::Enterprise);
        assert!(startup.max_components < default.max_components);
        assert!(default.max_components < enterprise.max_components);
        assert!(enterprise.require_cdn && enterprise.require_load_balancer);
        assert!(!startup.require_observability);
        for c in [startup, default, enterprise] {
            assert!(c.min_components <= c.max_components);
            assert!(c.max_components <= crate::schema::MAX_NODES);
        }
    }

    #[test]
    fn incompatibility_pairs_are_distinct() {
        for pair in INCOMPATIBLE_FRAMEWORKS {
            assert_ne!(pair.first, pair.second);
            assert!(!pair.reason.is_empty());
        }
    }
}
