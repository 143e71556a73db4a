//! Dependency resolution - module metadata to a validated load order
//!
//! Pure functions, no state is kept between calls. Ordering uses Kahn's algorithm with a ready
//! queue sorted by descending priority; equal priorities keep the order in which they became
//! ready (input order for the initial set).

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::application::errors::OrchestratorError;
use crate::domain::entities::ModuleMetadata;

/// Result of a successful resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyResolution {
    pub load_order: Vec<String>,
    /// Module id -> modules it depends on
    pub dependencies: HashMap<String, Vec<String>>,
    /// Module id -> modules that depend on it
    pub dependents: HashMap<String, Vec<String>>,
}

impl DependencyResolution {
    /// Dependents before their dependencies
    pub fn unload_order(&self) -> Vec<String> {
        self.load_order.iter().rev().cloned().collect()
    }
}

/// Outcome of [`check_dependencies`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheck {
    pub satisfied: bool,
    pub missing: Vec<String>,
}

/// Compute the load order for `modules`.
///
/// Fails with `MissingDependency` if a declared dependency is not in the input, checked before
/// sorting, and with `CircularDependency` if the graph has a cycle. Optional dependencies never
/// take part.
pub fn resolve(modules: &[ModuleMetadata]) -> Result<DependencyResolution, OrchestratorError> {
    let mut by_id: HashMap<&str, &ModuleMetadata> = HashMap::new();
    let mut ids: Vec<&str> = Vec::with_capacity(modules.len());
    for module in modules {
        if by_id.insert(module.id.as_str(), module).is_some() {
            tracing::warn!("Duplicate module id '{}', keeping the last declaration", module.id);
        } else {
            ids.push(module.id.as_str());
        }
    }

    for id in &ids {
        for dep in &by_id[id].dependencies {
            if !by_id.contains_key(dep.as_str()) {
                return Err(OrchestratorError::MissingDependency {
                    module_id: id.to_string(),
                    missing_dependency: dep.clone(),
                });
            }
        }
    }

    let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for id in &ids {
        dependents.entry(id.to_string()).or_default();
    }
    for id in &ids {
        let mut deps: Vec<String> = Vec::new();
        for dep in &by_id[id].dependencies {
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }
        for dep in &deps {
            dependents.entry(dep.clone()).or_default().push(id.to_string());
        }
        in_degree.insert(*id, deps.len());
        dependencies.insert(id.to_string(), deps);
    }

    let priority = |id: &str| by_id[id].priority;

    let mut ready: VecDeque<&str> = ids.iter().copied().filter(|id| in_degree[id] == 0).collect();
    ready.make_contiguous().sort_by_key(|id| Reverse(priority(*id)));

    let mut load_order = Vec::with_capacity(ids.len());
    while let Some(id) = ready.pop_front() {
        load_order.push(id.to_string());

        let mut newly_ready = false;
        for dependent in &dependents[id] {
            if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(by_id[dependent.as_str()].id.as_str());
                    newly_ready = true;
                }
            }
        }
        if newly_ready {
            ready.make_contiguous().sort_by_key(|id| Reverse(priority(*id)));
        }
    }

    if load_order.len() < ids.len() {
        let ordered: HashSet<&str> = load_order.iter().map(String::as_str).collect();
        let cycle = find_cycle(&ids, &dependencies, &ordered).unwrap_or_else(|| {
            // Kahn's algorithm only stalls on a cycle, so the search above always finds one
            ids.iter()
                .filter(|id| !ordered.contains(*id))
                .map(|id| id.to_string())
                .collect()
        });
        return Err(OrchestratorError::CircularDependency { cycle });
    }

    tracing::debug!("Resolved load order: {}", load_order.join(", "));

    Ok(DependencyResolution {
        load_order,
        dependencies,
        dependents,
    })
}

/// Depth-first search over the modules Kahn's algorithm could not order. Returns the path of
/// the first back edge found, closed with its starting module: `[a, b, c, a]`.
fn find_cycle(
    ids: &[&str],
    dependencies: &HashMap<String, Vec<String>>,
    ordered: &HashSet<&str>,
) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    fn visit(
        node: &str,
        dependencies: &HashMap<String, Vec<String>>,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        marks.insert(node.to_string(), Mark::InProgress);
        path.push(node.to_string());

        for dep in dependencies.get(node).into_iter().flatten() {
            match marks.get(dep.as_str()) {
                Some(Mark::InProgress) => {
                    let start = path.iter().position(|id| id == dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = visit(dep, dependencies, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        marks.insert(node.to_string(), Mark::Done);
        None
    }

    let mut marks: HashMap<String, Mark> = ordered.iter().map(|id| (id.to_string(), Mark::Done)).collect();
    for id in ids {
        if marks.contains_key(*id) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(cycle) = visit(id, dependencies, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

/// Check that every dependency of `module_id` is already loaded
pub fn check_dependencies(
    module_id: &str,
    dependencies: &[String],
    loaded: &HashSet<String>,
) -> DependencyCheck {
    let missing: Vec<String> = dependencies
        .iter()
        .filter(|dep| !loaded.contains(*dep))
        .cloned()
        .collect();

    if !missing.is_empty() {
        tracing::debug!("Module '{}' is missing dependencies: {}", module_id, missing.join(", "));
    }

    DependencyCheck {
        satisfied: missing.is_empty(),
        missing,
    }
}

/// Module id -> modules that depend on it, for a set that need not be complete.
///
/// Unlike [`resolve`] this never fails; dependencies outside `modules` are kept as keys.
pub fn dependents_of(modules: &[ModuleMetadata]) -> HashMap<String, Vec<String>> {
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for module in modules {
        for dep in &module.dependencies {
            let entry = dependents.entry(dep.clone()).or_default();
            if !entry.contains(&module.id) {
                entry.push(module.id.clone());
            }
        }
    }
    dependents
}

/// Every module that transitively depends on `module_id`, in breadth-first order
pub fn affected_modules(module_id: &str, dependents: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut affected = Vec::new();
    let mut seen: HashSet<&str> = HashSet::from([module_id]);
    let mut queue: VecDeque<&str> = VecDeque::from([module_id]);

    while let Some(current) = queue.pop_front() {
        for dependent in dependents.get(current).into_iter().flatten() {
            if seen.insert(dependent.as_str()) {
                affected.push(dependent.clone());
                queue.push_back(dependent.as_str());
            }
        }
    }

    affected
}
