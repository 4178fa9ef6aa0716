use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use invload_common::{
    error::Error,
    value::{VarMap, VarValue},
};
use serde::Serialize;
use tracing::debug;

use crate::{
    group::RawInventory,
    inventory::InventoryFormat,
    resolve::{self, Hierarchy, ALL},
};

#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    name: String,
    hosts: Vec<String>,
    vars: VarMap,
    children: Vec<String>,
    effective_vars: VarMap,
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hosts listed directly in this group.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn vars(&self) -> &VarMap {
        &self.vars
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Own vars merged over everything inherited from parent groups.
    pub fn effective_vars(&self) -> &VarMap {
        &self.effective_vars
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Host {
    name: String,
    vars: VarMap,
    groups: Vec<String>,
    effective_vars: VarMap,
}

impl Host {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vars(&self) -> &VarMap {
        &self.vars
    }

    /// Groups that list this host directly.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn effective_vars(&self) -> &VarMap {
        &self.effective_vars
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VarEntry {
    pub name: String,
    pub value: VarValue,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupRecord {
    pub group_name: String,
    pub group_vars: Vec<VarEntry>,
    pub hosts: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostRecord {
    pub host_name: String,
    pub host_vars: Vec<VarEntry>,
    pub groups: Vec<String>,
}

fn entries(vars: &VarMap) -> Vec<VarEntry> {
    vars.iter()
        .map(|(name, value)| VarEntry {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

/// A fully resolved inventory. Nothing in it changes after loading; load the
/// source again to pick up edits.
#[derive(Clone, Debug)]
pub struct ConfigSnapshot {
    source: PathBuf,
    format: InventoryFormat,
    groups: Vec<Group>,
    hosts: Vec<Host>,
    group_index: HashMap<String, usize>,
    host_index: HashMap<String, usize>,
}

impl ConfigSnapshot {
    pub fn build(
        raw: RawInventory,
        source: PathBuf,
        format: InventoryFormat,
    ) -> Result<Self, Error> {
        resolve::check_children(&raw)?;
        let raw = resolve::synthesize_all(raw);
        Self::assemble(&raw, source, format)
    }

    fn assemble(
        raw: &RawInventory,
        source: PathBuf,
        format: InventoryFormat,
    ) -> Result<Self, Error> {
        let hierarchy = Hierarchy::new(raw);

        let mut host_vars: IndexMap<&str, (VarMap, Vec<&str>)> = IndexMap::new();
        for group in raw.groups() {
            for host in &group.hosts {
                let (vars, groups) = host_vars.entry(host.name.as_str()).or_default();
                for (key, value) in &host.vars {
                    match vars.get(key) {
                        Some(existing) if existing != value => {
                            let e = Error::schema(format!(
                                "host {} has conflicting values for variable {key}: {existing} and {value}",
                                host.name
                            ));
                            return match &host.location {
                                Some(location) => e.with_location(location.clone()).err(),
                                None => e.err(),
                            };
                        }
                        _ => {
                            vars.insert(key.clone(), value.clone());
                        }
                    }
                }
                groups.push(&group.name);
            }
        }

        let hosts: Vec<Host> = host_vars
            .into_iter()
            .map(|(name, (mut vars, groups))| {
                if let Some(overrides) = raw.host_overrides(name) {
                    for (key, value) in overrides {
                        vars.insert(key.clone(), value.clone());
                    }
                }
                let effective_vars = hierarchy.host_vars(&groups, &vars);
                Host {
                    name: name.to_string(),
                    vars,
                    groups: groups.into_iter().map(|g| g.to_string()).collect(),
                    effective_vars,
                }
            })
            .collect();

        let groups: Vec<Group> = raw
            .groups()
            .iter()
            .map(|group| Group {
                name: group.name.clone(),
                hosts: group.hosts.iter().map(|h| h.name.clone()).collect(),
                vars: group.vars.clone(),
                children: group.children.iter().map(|c| c.name.clone()).collect(),
                effective_vars: hierarchy.group_vars(&group.name),
            })
            .collect();

        let snapshot = Self {
            source,
            format,
            group_index: index(groups.iter().map(|g| g.name.as_str()), "group")?,
            host_index: index(hosts.iter().map(|h| h.name.as_str()), "host")?,
            groups,
            hosts,
        };
        snapshot.check()?;

        debug!(
            source = %snapshot.source.display(),
            groups = snapshot.groups.len(),
            hosts = snapshot.hosts.len(),
            "inventory resolved"
        );
        Ok(snapshot)
    }

    fn check(&self) -> Result<(), Error> {
        let all = self.groups.iter().filter(|g| g.name == ALL).count();
        if all != 1 {
            return Error::schema(format!("expected one {ALL} group, found {all}")).err();
        }
        for group in &self.groups {
            if let Some(host) = group.hosts.iter().find(|h| !self.host_index.contains_key(*h)) {
                return Error::schema(format!(
                    "group {} lists host {host} which doesn't exist",
                    group.name
                ))
                .err();
            }
            if let Some(child) = group
                .children
                .iter()
                .find(|c| !self.group_index.contains_key(*c))
            {
                return Error::schema(format!(
                    "group {} lists child group {child} which doesn't exist",
                    group.name
                ))
                .err();
            }
        }
        Ok(())
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn format(&self) -> InventoryFormat {
        self.format
    }

    /// Groups in the order they were first defined, `all` included.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.group_index.get(name).map(|i| &self.groups[*i])
    }

    /// Hosts in the order they first appear in any group.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.host_index.get(name).map(|i| &self.hosts[*i])
    }

    pub fn all(&self) -> &Group {
        // presence of `all` is checked when the snapshot is built
        &self.groups[self.group_index[ALL]]
    }

    /// Hosts that `name` refers to: every host in the group of that name and
    /// in its descendants, or else the single host of that name.
    pub fn hosts_from_name(&self, name: &str) -> Option<Vec<&Host>> {
        if let Some(group) = self.group(name) {
            let mut visited = HashSet::new();
            let mut seen = HashSet::new();
            let mut hosts = Vec::new();
            self.collect_hosts(group, &mut visited, &mut seen, &mut hosts);
            return Some(hosts);
        }
        self.host(name).map(|host| vec![host])
    }

    fn collect_hosts<'a>(
        &'a self,
        group: &'a Group,
        visited: &mut HashSet<&'a str>,
        seen: &mut HashSet<&'a str>,
        hosts: &mut Vec<&'a Host>,
    ) {
        if !visited.insert(&group.name) {
            return;
        }
        for name in &group.hosts {
            if seen.insert(name) {
                if let Some(host) = self.host(name) {
                    hosts.push(host);
                }
            }
        }
        for child in &group.children {
            if let Some(child) = self.group(child) {
                self.collect_hosts(child, visited, seen, hosts);
            }
        }
    }

    /// One record per group with its effective vars and direct hosts.
    pub fn group_config(&self) -> Vec<GroupRecord> {
        self.groups
            .iter()
            .map(|group| GroupRecord {
                group_name: group.name.clone(),
                group_vars: entries(&group.effective_vars),
                hosts: group.hosts.clone(),
            })
            .collect()
    }

    pub fn host_config(&self) -> Vec<HostRecord> {
        self.hosts
            .iter()
            .map(|host| HostRecord {
                host_name: host.name.clone(),
                host_vars: entries(&host.effective_vars),
                groups: host.groups.clone(),
            })
            .collect()
    }
}

fn index<'a>(
    names: impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<HashMap<String, usize>, Error> {
    let mut index = HashMap::new();
    for (i, name) in names.enumerate() {
        if index.insert(name.to_string(), i).is_some() {
            return Error::schema(format!("{what} name {name} already exists")).err();
        }
    }
    Ok(index)
}
