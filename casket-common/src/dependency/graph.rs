//! Dependency graph for casks and formulae
//!
//! Builds an arena graph of every package reachable from a root, then orders
//! it so that dependencies come before their dependents. Cycles are reported
//! through Tarjan's strongly connected components.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, instrument};

use crate::error::{CasketError, Result};
use crate::formulary::PackageSource;
use crate::model::{Package, PackageId};

/// Arena of packages; an edge `a -> b` means `a` depends on `b`.
struct PackageArena {
    graph: DiGraph<PackageId, ()>,
    node_map: HashMap<PackageId, NodeIndex>,
    packages: HashMap<NodeIndex, Package>,
}

impl PackageArena {
    fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
            packages: HashMap::new(),
        }
    }

    /// Returns the node and whether it was newly added.
    fn add_package(&mut self, package: Package) -> (NodeIndex, bool) {
        let id = package.id();
        if let Some(idx) = self.node_map.get(&id) {
            return (*idx, false);
        }
        let idx = self.graph.add_node(id.clone());
        self.node_map.insert(id, idx);
        self.packages.insert(idx, package);
        (idx, true)
    }

    fn name(&self, idx: NodeIndex) -> &str {
        &self.graph[idx].name
    }
}

/// Root identity plus version; a new version may declare new dependencies.
type RootKey = (PackageId, String);

/// Resolves and caches the dependency order for root packages.
pub struct DependencyGraphBuilder {
    source: Arc<dyn PackageSource>,
    resolved: Mutex<HashMap<RootKey, Arc<Vec<Package>>>>,
}

impl DependencyGraphBuilder {
    pub fn new(source: Arc<dyn PackageSource>) -> Self {
        Self {
            source,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// All transitive dependencies of `root`, dependencies first, root excluded.
    #[instrument(skip(self, root), fields(root = %root))]
    pub fn resolve(&self, root: &Package) -> Result<Vec<Package>> {
        let root_id = root.id();
        let key = (root_id.clone(), root.version());
        if let Some(cached) = self.cached(&key)? {
            debug!("Using cached dependency order for {}", root_id);
            return Ok(cached.as_ref().clone());
        }

        let arena = self.build_arena(root)?;
        let root_idx = arena.node_map[&root_id];

        let order = match toposort(&arena.graph, None) {
            Ok(order) => order,
            Err(cycle) => {
                debug!(
                    "Cycle detected at {} while resolving {}",
                    arena.name(cycle.node_id()),
                    root_id
                );
                return Err(cycle_error(&arena, root_idx));
            }
        };

        // toposort puts dependents first along `package -> dependency` edges.
        let dependencies: Vec<Package> = order
            .into_iter()
            .rev()
            .filter(|idx| *idx != root_idx)
            .filter_map(|idx| arena.packages.get(&idx).cloned())
            .collect();
        debug!(
            "Resolved {} dependencies for {}: {:?}",
            dependencies.len(),
            root_id,
            dependencies.iter().map(|p| p.name()).collect::<Vec<_>>()
        );

        self.resolved
            .lock()
            .map_err(|_| CasketError::Generic("dependency cache lock poisoned".to_string()))?
            .insert(key, Arc::new(dependencies.clone()));
        Ok(dependencies)
    }

    fn cached(&self, key: &RootKey) -> Result<Option<Arc<Vec<Package>>>> {
        let guard = self
            .resolved
            .lock()
            .map_err(|_| CasketError::Generic("dependency cache lock poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn build_arena(&self, root: &Package) -> Result<PackageArena> {
        let mut arena = PackageArena::new();
        let (root_idx, _) = arena.add_package(root.clone());
        let mut queue = VecDeque::from([root_idx]);

        while let Some(current) = queue.pop_front() {
            let package = arena.packages[&current].clone();
            let current_id = package.id();
            for dep_id in package.declared_dependencies() {
                if dep_id.kind == current_id.kind && dep_id.short_name() == current_id.short_name() {
                    return Err(CasketError::SelfReferentialDependency(
                        package.name().to_string(),
                    ));
                }
                let dep_idx = match arena.node_map.get(&dep_id) {
                    Some(idx) => *idx,
                    None => {
                        let dependency = self.source.load(&dep_id)?;
                        let (idx, added) = arena.add_package(dependency);
                        if added {
                            queue.push_back(idx);
                        }
                        // Register the requested spelling too, so later lookups hit the arena.
                        arena.node_map.entry(dep_id.clone()).or_insert(idx);
                        idx
                    }
                };
                if arena.graph.find_edge(current, dep_idx).is_none() {
                    arena.graph.add_edge(current, dep_idx, ());
                }
            }
        }
        Ok(arena)
    }
}

/// Picks the largest strongly connected component and names its members, root excluded.
fn cycle_error(arena: &PackageArena, root_idx: NodeIndex) -> CasketError {
    let largest = tarjan_scc(&arena.graph)
        .into_iter()
        .max_by_key(|component| component.len())
        .unwrap_or_default();
    let mut cycle: Vec<String> = largest
        .into_iter()
        .filter(|idx| *idx != root_idx)
        .map(|idx| arena.name(idx).to_string())
        .collect();
    cycle.sort();
    cycle.dedup();
    CasketError::DependencyCycle {
        package: arena.name(root_idx).to_string(),
        cycle,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::model::{Cask, Formula};

    #[derive(Default)]
    struct MapSource {
        casks: HashMap<String, Arc<Cask>>,
        formulae: HashMap<String, Arc<Formula>>,
        loads: AtomicUsize,
    }

    impl MapSource {
        fn with_cask(mut self, token: &str, cask_deps: &[&str], formula_deps: &[&str]) -> Self {
            let cask: Cask = serde_json::from_value(json!({
                "token": token,
                "version": "1.0",
                "depends_on": {"cask": cask_deps, "formula": formula_deps}
            }))
            .unwrap();
            self.casks.insert(token.to_string(), Arc::new(cask));
            self
        }

        fn with_formula(mut self, name: &str, deps: &[&str]) -> Self {
            let formula = Formula {
                name: name.to_string(),
                dependencies: deps.iter().map(|d| d.to_string()).collect(),
                ..Default::default()
            };
            self.formulae.insert(name.to_string(), Arc::new(formula));
            self
        }

        fn root(&self, token: &str) -> Package {
            Package::Cask(Arc::clone(&self.casks[token]))
        }
    }

    impl PackageSource for MapSource {
        fn load_cask(&self, token: &str) -> Result<Arc<Cask>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.casks
                .get(token)
                .cloned()
                .ok_or_else(|| CasketError::NotFound(token.to_string()))
        }

        fn load_formula(&self, name: &str) -> Result<Arc<Formula>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.formulae
                .get(name)
                .cloned()
                .ok_or_else(|| CasketError::NotFound(name.to_string()))
        }
    }

    fn position(order: &[Package], name: &str) -> usize {
        order.iter().position(|p| p.name() == name).unwrap()
    }

    #[test]
    fn dependencies_precede_dependents() {
        let source = MapSource::default()
            .with_cask("app", &["mid", "leaf"], &["tool"])
            .with_cask("mid", &["leaf"], &[])
            .with_cask("leaf", &[], &[])
            .with_formula("tool", &["libtool"])
            .with_formula("libtool", &[]);
        let root = source.root("app");
        let builder = DependencyGraphBuilder::new(Arc::new(source));

        let order = builder.resolve(&root).unwrap();
        let names: Vec<&str> = order.iter().map(|p| p.name()).collect();
        assert_eq!(order.len(), 4);
        assert!(!names.contains(&"app"));
        assert!(position(&order, "leaf") < position(&order, "mid"));
        assert!(position(&order, "libtool") < position(&order, "tool"));
    }

    #[test]
    fn resolution_is_cached_per_root() {
        let source = Arc::new(
            MapSource::default()
                .with_cask("app", &["leaf"], &[])
                .with_cask("leaf", &[], &[]),
        );
        let root = source.root("app");
        let builder = DependencyGraphBuilder::new(source.clone());

        builder.resolve(&root).unwrap();
        let loads = source.loads.load(Ordering::SeqCst);
        builder.resolve(&root).unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), loads);
    }

    #[test]
    fn new_root_version_is_resolved_again() {
        let source = Arc::new(
            MapSource::default()
                .with_cask("app", &[], &[])
                .with_cask("leaf", &[], &[]),
        );
        let builder = DependencyGraphBuilder::new(source.clone());
        assert!(builder.resolve(&source.root("app")).unwrap().is_empty());

        let newer: Cask = serde_json::from_value(json!({
            "token": "app",
            "version": "2.0",
            "depends_on": {"cask": ["leaf"]}
        }))
        .unwrap();
        let order = builder.resolve(&Package::Cask(Arc::new(newer))).unwrap();
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].name(), "leaf");
    }

    #[test]
    fn two_node_cycle_reports_both_members() {
        let source = MapSource::default()
            .with_cask("root", &["a"], &[])
            .with_cask("a", &["b"], &[])
            .with_cask("b", &["a"], &[]);
        let root = source.root("root");
        let builder = DependencyGraphBuilder::new(Arc::new(source));

        match builder.resolve(&root) {
            Err(CasketError::DependencyCycle { package, cycle }) => {
                assert_eq!(package, "root");
                assert_eq!(cycle, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected a cycle error, got {other:?}"),
        }
    }

    #[test]
    fn cycle_through_root_excludes_root() {
        let source = MapSource::default()
            .with_cask("a", &["b"], &[])
            .with_cask("b", &["a"], &[]);
        let root = source.root("a");
        let builder = DependencyGraphBuilder::new(Arc::new(source));

        match builder.resolve(&root) {
            Err(CasketError::DependencyCycle { cycle, .. }) => {
                assert_eq!(cycle, vec!["b".to_string()]);
            }
            other => panic!("expected a cycle error, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_fails_immediately() {
        let source = MapSource::default().with_cask("selfish", &["selfish"], &[]);
        let root = source.root("selfish");
        let builder = DependencyGraphBuilder::new(Arc::new(source));

        assert!(matches!(
            builder.resolve(&root),
            Err(CasketError::SelfReferentialDependency(name)) if name == "selfish"
        ));
    }

    #[test]
    fn missing_dependency_surfaces_not_found() {
        let source = MapSource::default().with_cask("app", &["ghost"], &[]);
        let root = source.root("app");
        let builder = DependencyGraphBuilder::new(Arc::new(source));

        assert!(matches!(
            builder.resolve(&root),
            Err(CasketError::NotFound(name)) if name == "ghost"
        ));
    }
}
