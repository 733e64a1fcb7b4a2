//! Ordered startup composition.
//!
//! Registration happens in named steps, each declaring the steps it must run
//! after. The run order is resolved with Kahn's algorithm; among steps that
//! are ready at the same time, declaration order wins.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;
use tracing::{debug, info};

use crate::fields::MetaRegistry;
use crate::models::PostType;
use crate::permissions::ContributionPolicy;
use crate::routes::{self, RouteTable, patch_anonymous_writes};

/// Startup errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitError {
    #[error("init step '{step}' runs after '{dependency}', which does not exist")]
    UnknownDependency { step: String, dependency: String },

    #[error("init step '{0}' is declared twice")]
    DuplicateStep(String),

    #[error("circular init order involving: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("init step '{step}' failed: {message}")]
    Step { step: String, message: String },
}

/// Everything the init steps register.
#[derive(Debug, Clone)]
pub struct Registry {
    pub policy: ContributionPolicy,
    pub post_types: Vec<PostType>,
    pub meta: MetaRegistry,
    pub routes: RouteTable,
}

impl Registry {
    pub fn new(policy: ContributionPolicy) -> Self {
        Self {
            policy,
            post_types: Vec::new(),
            meta: MetaRegistry::new(),
            routes: RouteTable::new(),
        }
    }
}

pub type InitFn = fn(&mut Registry) -> Result<(), InitError>;

/// One named registration step.
#[derive(Clone, Copy)]
pub struct InitStep {
    pub name: &'static str,
    pub after: &'static [&'static str],
    pub run: InitFn,
}

impl std::fmt::Debug for InitStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitStep")
            .field("name", &self.name)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

/// The kernel's registration steps.
pub fn default_steps() -> Vec<InitStep> {
    vec![
        InitStep {
            name: "post_types",
            after: &[],
            run: register_post_types,
        },
        InitStep {
            name: "meta",
            after: &[],
            run: register_meta,
        },
        InitStep {
            name: "routes",
            after: &["post_types"],
            run: register_routes,
        },
        InitStep {
            name: "anonymous_writes",
            after: &["routes"],
            run: open_anonymous_writes,
        },
    ]
}

fn register_post_types(registry: &mut Registry) -> Result<(), InitError> {
    registry.post_types.extend(PostType::ALL);
    Ok(())
}

fn register_meta(registry: &mut Registry) -> Result<(), InitError> {
    registry.meta = MetaRegistry::forum_defaults();
    Ok(())
}

fn register_routes(registry: &mut Registry) -> Result<(), InitError> {
    if registry.post_types.is_empty() {
        return Err(InitError::Step {
            step: "routes".to_string(),
            message: "no post types registered".to_string(),
        });
    }

    routes::register_health_route(&mut registry.routes);
    for post_type in registry.post_types.clone() {
        routes::register_post_routes(&mut registry.routes, post_type);
    }
    Ok(())
}

fn open_anonymous_writes(registry: &mut Registry) -> Result<(), InitError> {
    for post_type in [PostType::Topic, PostType::Reply] {
        patch_anonymous_writes(
            &mut registry.routes,
            &post_type.collection_path(),
            &registry.policy,
        );
    }
    Ok(())
}

/// Resolve the run order of `steps`, as indices into the slice.
pub fn resolve_order(steps: &[InitStep]) -> Result<Vec<usize>, InitError> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, step) in steps.iter().enumerate() {
        if index.insert(step.name, i).is_some() {
            return Err(InitError::DuplicateStep(step.name.to_string()));
        }
    }

    // in_degree[i] = number of steps that must run before step i
    let mut in_degree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (i, step) in steps.iter().enumerate() {
        for dependency in step.after {
            let Some(&dep) = index.get(dependency) else {
                return Err(InitError::UnknownDependency {
                    step: step.name.to_string(),
                    dependency: dependency.to_string(),
                });
            };
            in_degree[i] += 1;
            dependents[dep].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != steps.len() {
        let in_cycle = steps
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, step)| step.name.to_string())
            .collect();
        return Err(InitError::Cycle(in_cycle));
    }

    Ok(order)
}

/// Run `steps` in resolved order against `registry`.
pub fn run(steps: &[InitStep], registry: &mut Registry) -> Result<(), InitError> {
    for i in resolve_order(steps)? {
        let step = &steps[i];
        debug!(step = step.name, "running init step");
        (step.run)(registry)?;
    }
    Ok(())
}

/// Build the registry with the default steps.
pub fn bootstrap(policy: ContributionPolicy) -> Result<Registry, InitError> {
    let mut registry = Registry::new(policy);
    run(&default_steps(), &mut registry)?;

    info!(
        post_types = registry.post_types.len(),
        meta_keys = registry.meta.len(),
        routes = registry.routes.len(),
        "registry initialized"
    );
    Ok(registry)
}
