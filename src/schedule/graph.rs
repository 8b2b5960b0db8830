// src/schedule/graph.rs

//! Index-based dependency graph over a candidate set
//!
//! Nodes are candidate positions; an edge `a -> b` means `a` needs `b` built
//! first. Strongly connected components are found with Tarjan's algorithm,
//! which emits every component after all components it depends on. That
//! order is exactly what stage assignment needs.

/// Directed graph keyed by candidate index
#[derive(Debug, Default)]
pub struct BuildGraph {
    edges: Vec<Vec<usize>>,
}

/// Per-node stage plus the non-trivial components found
#[derive(Debug, Default)]
pub struct Staging {
    pub stages: Vec<u32>,
    /// Components with more than one member, members in index order
    pub cycles: Vec<Vec<usize>>,
    /// Cycle group per node, if it belongs to one
    pub cycle_of: Vec<Option<usize>>,
}

struct Tarjan<'g> {
    graph: &'g BuildGraph,
    next_index: usize,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    components: Vec<Vec<usize>>,
}

impl Tarjan<'_> {
    fn visit(&mut self, v: usize) {
        self.index[v] = Some(self.next_index);
        self.lowlink[v] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        let graph = self.graph;
        for &w in &graph.edges[v] {
            match self.index[w] {
                None => {
                    self.visit(w);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                }
                Some(w_index) if self.on_stack[w] => {
                    self.lowlink[v] = self.lowlink[v].min(w_index);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[v]) == self.index[v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            self.components.push(component);
        }
    }
}

impl BuildGraph {
    pub fn new(nodes: usize) -> Self {
        Self {
            edges: vec![Vec::new(); nodes],
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Record that `from` depends on `to`; self-edges are dropped
    pub fn add_edge(&mut self, from: usize, to: usize) {
        if from != to && !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
    }

    pub fn dependencies(&self, node: usize) -> &[usize] {
        &self.edges[node]
    }

    /// Strongly connected components, dependencies first
    pub fn components(&self) -> Vec<Vec<usize>> {
        let n = self.len();
        let mut tarjan = Tarjan {
            graph: self,
            next_index: 0,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            components: Vec::new(),
        };
        for v in 0..n {
            if tarjan.index[v].is_none() {
                tarjan.visit(v);
            }
        }
        tarjan.components
    }

    /// Assign stages: 0 without in-graph dependencies, otherwise one past
    /// the highest dependency. Members of a cycle share one stage.
    pub fn stages(&self) -> Staging {
        let n = self.len();
        let mut staging = Staging {
            stages: vec![0; n],
            cycles: Vec::new(),
            cycle_of: vec![None; n],
        };
        let mut component_of = vec![0usize; n];
        let components = self.components();
        let mut component_stage = vec![0u32; components.len()];

        for (c, members) in components.iter().enumerate() {
            for &m in members {
                component_of[m] = c;
            }

            let stage = members
                .iter()
                .flat_map(|&m| self.edges[m].iter())
                .map(|&dep| component_of[dep])
                .filter(|&dc| dc != c)
                .map(|dc| component_stage[dc] + 1)
                .max()
                .unwrap_or(0);
            component_stage[c] = stage;

            if members.len() > 1 {
                let group = staging.cycles.len();
                for &m in members {
                    staging.cycle_of[m] = Some(group);
                }
                staging.cycles.push(members.clone());
            }
            for &m in members {
                staging.stages[m] = stage;
            }
        }

        staging
    }
}
