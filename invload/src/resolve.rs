use std::collections::{HashMap, HashSet};

use invload_common::{error::Error, value::VarMap};
use itertools::Itertools;
use tracing::debug;

use crate::group::{ChildRef, RawInventory};

pub const ALL: &str = "all";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Checks that every child names a defined group, that `all` is nobody's
/// child, and that `children` has no cycles.
pub fn check_children(raw: &RawInventory) -> Result<(), Error> {
    for group in raw.groups() {
        for child in &group.children {
            let e = if child.name == ALL {
                Error::schema(format!("group {ALL} can't be a child of {}", group.name))
            } else if !raw.contains(&child.name) {
                Error::schema(format!(
                    "group {} lists child group {} which doesn't exist",
                    group.name, child.name
                ))
            } else {
                continue;
            };
            return with_location(e, child).err();
        }
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();
    for group in raw.groups() {
        if !marks.contains_key(group.name.as_str()) {
            visit(raw, &group.name, &mut marks, &mut path)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    raw: &'a RawInventory,
    name: &'a str,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Result<(), Error> {
    marks.insert(name, Mark::Visiting);
    path.push(name);

    if let Some(group) = raw.get(name) {
        for child in &group.children {
            match marks.get(child.name.as_str()) {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| *n == child.name).unwrap_or(0);
                    let cycle = path[start..]
                        .iter()
                        .chain(std::iter::once(&child.name.as_str()))
                        .join(" -> ");
                    return with_location(
                        Error::schema(format!("circular group children: {cycle}")),
                        child,
                    )
                    .err();
                }
                None => visit(raw, &child.name, marks, path)?,
            }
        }
    }

    path.pop();
    marks.insert(name, Mark::Done);
    Ok(())
}

fn with_location(e: Error, child: &ChildRef) -> Error {
    match &child.location {
        Some(location) => e.with_location(location.clone()),
        None => e,
    }
}

/// Makes sure `all` exists and is the parent of every group that has no
/// other parent. A synthesized `all` comes after every defined group.
pub fn synthesize_all(mut raw: RawInventory) -> RawInventory {
    let children: HashSet<&str> = raw
        .groups()
        .iter()
        .flat_map(|g| g.children.iter().map(|c| c.name.as_str()))
        .collect();
    let top: Vec<String> = raw
        .groups()
        .iter()
        .map(|g| g.name.as_str())
        .filter(|name| *name != ALL && !children.contains(name))
        .map(|name| name.to_string())
        .collect();

    if !raw.contains(ALL) {
        debug!("inventory has no {ALL} group, adding one");
    }
    let all = raw.entry(ALL, None);
    for name in top {
        all.children.push(ChildRef {
            name,
            location: None,
        });
    }
    raw
}

/// Parent links and depths of an acyclic group tree rooted at `all`.
pub struct Hierarchy<'a> {
    raw: &'a RawInventory,
    parents: HashMap<&'a str, Vec<&'a str>>,
    depths: HashMap<&'a str, usize>,
}

impl<'a> Hierarchy<'a> {
    pub fn new(raw: &'a RawInventory) -> Self {
        let mut parents: HashMap<&str, Vec<&str>> = HashMap::new();
        for group in raw.groups() {
            for child in &group.children {
                parents
                    .entry(child.name.as_str())
                    .or_default()
                    .push(&group.name);
            }
        }

        let mut hierarchy = Self {
            raw,
            parents,
            depths: HashMap::new(),
        };
        for group in raw.groups() {
            hierarchy.compute_depth(&group.name);
        }
        hierarchy
    }

    // longest distance from a root
    fn compute_depth(&mut self, name: &'a str) -> usize {
        if let Some(depth) = self.depths.get(name) {
            return *depth;
        }
        let parents = self.parents.get(name).cloned().unwrap_or_default();
        let depth = parents
            .into_iter()
            .map(|p| self.compute_depth(p) + 1)
            .max()
            .unwrap_or(0);
        self.depths.insert(name, depth);
        depth
    }

    pub fn depth(&self, name: &str) -> usize {
        self.depths.get(name).copied().unwrap_or(0)
    }

    pub fn parents(&self, name: &str) -> &[&'a str] {
        self.parents.get(name).map(|p| p.as_slice()).unwrap_or_default()
    }

    /// The given groups and all their ancestors, in the order their variables
    /// apply: shallow before deep, and by definition order at equal depth.
    pub fn lineage(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&'a str> = names.into_iter().collect();
        while let Some(name) = stack.pop() {
            if seen.insert(name) {
                stack.extend(self.parents(name).iter().copied());
            }
        }
        seen.into_iter()
            .sorted_by_key(|name| {
                (
                    self.depth(name),
                    self.raw.position(name).unwrap_or(usize::MAX),
                )
            })
            .collect()
    }

    pub fn group_vars(&self, name: &'a str) -> VarMap {
        self.merged(self.lineage([name]))
    }

    /// Variables of a host listed directly in `groups`; its own `vars` win
    /// over anything inherited.
    pub fn host_vars(&self, groups: &[&'a str], own: &VarMap) -> VarMap {
        let mut vars = self.merged(self.lineage(groups.iter().copied()));
        merge(&mut vars, own);
        vars
    }

    fn merged(&self, lineage: Vec<&'a str>) -> VarMap {
        let mut vars = VarMap::new();
        for name in lineage {
            if let Some(group) = self.raw.get(name) {
                merge(&mut vars, &group.vars);
            }
        }
        vars
    }
}

fn merge(into: &mut VarMap, from: &VarMap) {
    for (key, value) in from {
        into.insert(key.clone(), value.clone());
    }
}
