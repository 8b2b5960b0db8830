// src/schedule/mod.rs

//! Build ordering for a candidate set
//!
//! Dependencies are resolved only against the candidates themselves: a
//! dependency the target already satisfies is not an edge. Names resolve by
//! exact package name or basename first, then through provides, then
//! through the split-package suffix heuristic (`foo-headers` builds from
//! `foo`). The first candidate to claim a name keeps it.
//!
//! Every candidate gets a stage: 0 with no in-set dependencies, otherwise
//! one more than its deepest dependency. Dependency cycles do not abort
//! scheduling; members of a cycle share a stage and are reported.

mod graph;

pub use graph::{BuildGraph, Staging};

use crate::plan::CandidatePackage;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Split package suffixes that usually build from the bare basename
const SPLIT_SUFFIXES: [&str; 4] = ["-headers", "-docs", "-devel", "-dev"];

/// Ordered candidates plus the cycles that were tolerated
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub packages: Vec<CandidatePackage>,
    pub cycles: Vec<Vec<String>>,
}

impl Schedule {
    /// Highest stage in the schedule
    pub fn depth(&self) -> u32 {
        self.packages
            .iter()
            .map(|p| p.build_stage)
            .max()
            .unwrap_or(0)
    }
}

/// Name lookup over the candidate set
struct NameIndex {
    lookup: HashMap<String, usize>,
}

impl NameIndex {
    fn new(candidates: &[CandidatePackage]) -> Self {
        let mut lookup = HashMap::new();
        for (i, candidate) in candidates.iter().enumerate() {
            for name in candidate.supplied_names() {
                lookup.entry(name.to_string()).or_insert(i);
            }
        }
        for (i, candidate) in candidates.iter().enumerate() {
            for provide in &candidate.provides {
                if let Some(existing) = lookup.get(&provide.name) {
                    if *existing != i {
                        debug!(
                            "{} provided by both {} and {}, keeping {}",
                            provide.name,
                            candidates[*existing].name,
                            candidate.name,
                            candidates[*existing].name
                        );
                    }
                    continue;
                }
                lookup.insert(provide.name.clone(), i);
            }
        }
        Self { lookup }
    }

    fn resolve(&self, name: &str) -> Option<usize> {
        if let Some(&i) = self.lookup.get(name) {
            return Some(i);
        }
        SPLIT_SUFFIXES
            .iter()
            .filter_map(|suffix| name.strip_suffix(suffix))
            .find_map(|base| self.lookup.get(base).copied())
    }
}

/// Build the dependency graph restricted to the candidate set
pub fn build_graph(candidates: &[CandidatePackage]) -> BuildGraph {
    let names = NameIndex::new(candidates);
    let mut graph = BuildGraph::new(candidates.len());
    for (i, candidate) in candidates.iter().enumerate() {
        for dep in candidate.all_dependencies() {
            if let Some(j) = names.resolve(&dep.name) {
                graph.add_edge(i, j);
            }
        }
    }
    graph
}

/// Assign stages and order candidates by stage
///
/// The sort is stable, so candidates within one stage keep the order they
/// were given in.
pub fn schedule(mut candidates: Vec<CandidatePackage>) -> Schedule {
    let graph = build_graph(&candidates);
    let staging = graph.stages();

    let cycles: Vec<Vec<String>> = staging
        .cycles
        .iter()
        .map(|members| {
            members
                .iter()
                .map(|&m| candidates[m].name.clone())
                .collect()
        })
        .collect();
    for cycle in &cycles {
        warn!("Dependency cycle: {}", cycle.join(" <-> "));
    }

    for (i, candidate) in candidates.iter_mut().enumerate() {
        candidate.build_stage = staging.stages[i];
        candidate.cycle_group = staging.cycle_of[i];
    }
    candidates.sort_by_key(|c| c.build_stage);

    let schedule = Schedule {
        packages: candidates,
        cycles,
    };
    info!(
        "Scheduled {} packages in {} stages ({} cycles)",
        schedule.packages.len(),
        if schedule.packages.is_empty() { 0 } else { schedule.depth() + 1 },
        schedule.cycles.len()
    );
    schedule
}

/// Keep an explicit package order
///
/// Listed candidates are built one per stage in the order given. Anything
/// not listed (pulled-in dependencies) is scheduled normally and placed in
/// front of them.
pub fn preserve_order(candidates: Vec<CandidatePackage>, order: &[String]) -> Schedule {
    let position = |c: &CandidatePackage| {
        order
            .iter()
            .position(|name| c.supplied_names().any(|n| n == name.as_str()))
    };

    let (listed, unlisted): (Vec<_>, Vec<_>) =
        candidates.into_iter().partition(|c| position(c).is_some());

    let mut result = schedule(unlisted);
    let offset = if result.packages.is_empty() {
        0
    } else {
        result.depth() + 1
    };

    let mut listed: Vec<(usize, CandidatePackage)> = listed
        .into_iter()
        .map(|c| (position(&c).unwrap_or(usize::MAX), c))
        .collect();
    listed.sort_by_key(|(pos, _)| *pos);

    for (stage, (_, mut candidate)) in listed.into_iter().enumerate() {
        candidate.build_stage = offset + stage as u32;
        candidate.cycle_group = None;
        result.packages.push(candidate);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Repo;
    use crate::version::DepSpec;

    fn candidate(name: &str, deps: &[&str]) -> CandidatePackage {
        let mut c = CandidatePackage::bare(name, "1.0-1", Repo::Extra);
        c.depends = deps.iter().map(|d| DepSpec::parse(d)).collect();
        c
    }

    fn order(schedule: &Schedule) -> Vec<(&str, u32)> {
        schedule
            .packages
            .iter()
            .map(|p| (p.name.as_str(), p.build_stage))
            .collect()
    }

    #[test]
    fn test_chain_stages() {
        let s = schedule(vec![
            candidate("A", &["B"]),
            candidate("B", &["C"]),
            candidate("C", &[]),
        ]);
        assert_eq!(order(&s), vec![("C", 0), ("B", 1), ("A", 2)]);
        assert!(s.cycles.is_empty());
    }

    #[test]
    fn test_two_cycle() {
        let s = schedule(vec![candidate("A", &["B"]), candidate("B", &["A"])]);
        assert_eq!(order(&s), vec![("A", 0), ("B", 0)]);
        assert_eq!(s.cycles, vec![vec!["A".to_string(), "B".to_string()]]);
        assert!(s.packages.iter().all(|p| p.cycle_group == Some(0)));
    }

    #[test]
    fn test_out_of_set_dependencies_ignored() {
        let s = schedule(vec![candidate("app", &["glibc", "zlib>=1.3"])]);
        assert_eq!(order(&s), vec![("app", 0)]);
    }

    #[test]
    fn test_resolves_through_provides_and_versions() {
        let mut bash = candidate("bash", &[]);
        bash.provides.push(DepSpec::parse("sh"));
        let s = schedule(vec![candidate("script", &["sh>=1"]), bash]);
        assert_eq!(order(&s), vec![("bash", 0), ("script", 1)]);
    }

    #[test]
    fn test_first_provider_wins() {
        let mut a = candidate("a", &[]);
        a.provides.push(DepSpec::parse("virt"));
        let mut b = candidate("b", &["c"]);
        b.provides.push(DepSpec::parse("virt"));
        let s = schedule(vec![candidate("user", &["virt"]), a, b, candidate("c", &[])]);
        let stage = |n: &str| s.packages.iter().find(|p| p.name == n).unwrap().build_stage;
        assert_eq!(stage("user"), 1);
        assert_eq!(stage("b"), 1);
    }

    #[test]
    fn test_split_suffix_heuristic() {
        let mut gcc = candidate("gcc", &[]);
        gcc.packages = vec!["gcc".to_string(), "gcc-libs".to_string()];
        let s = schedule(vec![
            candidate("tool", &["gcc-libs", "linux-headers"]),
            gcc,
            candidate("linux", &[]),
        ]);
        let stage = |n: &str| s.packages.iter().find(|p| p.name == n).unwrap().build_stage;
        assert_eq!(stage("tool"), 1);
        assert_eq!(stage("gcc"), 0);
        assert_eq!(stage("linux"), 0);
    }

    #[test]
    fn test_stable_within_stage() {
        let s = schedule(vec![
            candidate("zeta", &[]),
            candidate("alpha", &[]),
            candidate("mid", &["zeta"]),
        ]);
        assert_eq!(order(&s), vec![("zeta", 0), ("alpha", 0), ("mid", 1)]);
    }

    #[test]
    fn test_preserve_order() {
        let mut pulled = candidate("libdep", &[]);
        pulled.added_reason = Some("depends for b".to_string());
        let s = preserve_order(
            vec![candidate("a", &[]), candidate("b", &["libdep"]), pulled],
            &["b".to_string(), "a".to_string()],
        );
        assert_eq!(order(&s), vec![("libdep", 0), ("b", 1), ("a", 2)]);
    }
}
