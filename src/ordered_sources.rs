//! Execution order of the sources of a job
//!
//! A source must run after every sibling it references, either explicitly through the job's
//! dependency sets or implicitly through a `${source::...}` token anywhere in its definition.
//! Among sources that are ready at the same time, the declared execution order wins, then
//! declaration order.
//!
//! Cycles are not fatal. The sources caught in one are appended in their tie-break order and
//! the unresolved references become empty substitutions at runtime.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{trace, warn};

use crate::connector::{Source, SourceMap};
use crate::reference;

/// Sources of a job in a valid execution order
#[derive(Debug, Clone)]
pub struct OrderedSources<'a> {
    sources: Vec<(&'a str, &'a Source)>,
}

impl<'a> OrderedSources<'a> {
    pub fn new(
        sources: &'a SourceMap,
        execution_order: &[String],
        dependencies: &BTreeMap<String, BTreeSet<String>>,
        prefix: Option<&str>,
    ) -> Self {
        let order = resolve_order(sources, execution_order, dependencies, prefix);
        let sources = order
            .into_iter()
            .filter_map(|index| {
                sources
                    .iter()
                    .nth(index)
                    .map(|(name, source)| (name.as_str(), source))
            })
            .collect();
        Self { sources }
    }

    pub fn names(&self) -> Vec<&'a str> {
        self.sources.iter().map(|(name, _)| *name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Source)> + '_ {
        self.sources.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Returns the indices (in declaration order) of the sources, topologically sorted
pub fn resolve_order(
    sources: &SourceMap,
    execution_order: &[String],
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    prefix: Option<&str>,
) -> Vec<usize> {
    let names: Vec<&str> = sources.names().collect();
    let count = names.len();

    let index_of = |name: &str| names.iter().position(|n| *n == name);
    let key_index: BTreeMap<String, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (reference::qualify_path(name, prefix), i))
        .collect();

    // declared order first, declaration order for the rest
    let rank: Vec<(usize, usize)> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let declared = execution_order
                .iter()
                .position(|n| n == name)
                .unwrap_or(usize::MAX);
            (declared, i)
        })
        .collect();

    let mut depends_on: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
    for (i, (name, source)) in sources.iter().enumerate() {
        for key in source.references(prefix) {
            match key_index.get(&key) {
                Some(&dep) if dep != i => {
                    depends_on[i].insert(dep);
                }
                Some(_) => {}
                None => trace!("{name}: reference {key} is not a sibling source"),
            }
        }

        if let Some(explicit) = dependencies.get(name.as_str()) {
            for dep in explicit {
                match index_of(dep) {
                    Some(dep) if dep != i => {
                        depends_on[i].insert(dep);
                    }
                    Some(_) => {}
                    None => warn!("{name}: declared dependency {dep} does not exist"),
                }
            }
        }
    }

    let mut remaining: Vec<usize> = depends_on.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (i, deps) in depends_on.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(i);
        }
    }

    let mut ready: BTreeSet<((usize, usize), usize)> = (0..count)
        .filter(|&i| remaining[i] == 0)
        .map(|i| (rank[i], i))
        .collect();
    let mut order = Vec::with_capacity(count);
    let mut scheduled = vec![false; count];

    while let Some(entry) = ready.pop_first() {
        let current = entry.1;
        order.push(current);
        scheduled[current] = true;

        for &dependent in &dependents[current] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert((rank[dependent], dependent));
            }
        }
    }

    if order.len() < count {
        let mut cyclic: Vec<usize> = (0..count).filter(|&i| !scheduled[i]).collect();
        cyclic.sort_by_key(|&i| rank[i]);
        warn!(
            "cyclic source references between {:?}, running them in declared order",
            cyclic.iter().map(|&i| names[i]).collect::<Vec<_>>()
        );
        order.extend(cyclic);
    }

    order
}
