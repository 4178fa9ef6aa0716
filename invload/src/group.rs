use std::collections::HashMap;

use invload_common::{
    error::{Error, ErrorLocation},
    value::{VarMap, VarValue},
};

#[derive(Clone, Debug)]
pub struct HostEntry {
    pub name: String,
    pub vars: VarMap,
    pub location: Option<ErrorLocation>,
}

impl HostEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: VarMap::new(),
            location: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChildRef {
    pub name: String,
    pub location: Option<ErrorLocation>,
}

/// A group exactly as written in the source, before `all` is synthesized and
/// before any inheritance is applied.
#[derive(Clone, Debug)]
pub struct GroupConfig {
    pub name: String,
    pub hosts: Vec<HostEntry>,
    pub vars: VarMap,
    pub children: Vec<ChildRef>,
    pub location: Option<ErrorLocation>,
}

impl GroupConfig {
    pub fn new(name: impl Into<String>, location: Option<ErrorLocation>) -> Self {
        Self {
            name: name.into(),
            hosts: Vec::new(),
            vars: VarMap::new(),
            children: Vec::new(),
            location,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.vars.is_empty() && self.children.is_empty()
    }

    pub fn add_host(&mut self, host: HostEntry) -> Result<(), Error> {
        if self.hosts.iter().any(|h| h.name == host.name) {
            let e = Error::schema(format!(
                "host {} is listed twice in group {}",
                host.name, self.name
            ));
            return match host.location {
                Some(location) => e.with_location(location).err(),
                None => e.err(),
            };
        }
        self.hosts.push(host);
        Ok(())
    }

    pub fn add_child(&mut self, child: ChildRef) -> Result<(), Error> {
        let e = if child.name == self.name {
            Error::schema(format!("group {} can't point to itself", self.name))
        } else if self.children.iter().any(|c| c.name == child.name) {
            Error::schema(format!(
                "group {} lists child {} twice",
                self.name, child.name
            ))
        } else {
            self.children.push(child);
            return Ok(());
        };
        match child.location {
            Some(location) => e.with_location(location).err(),
            None => e.err(),
        }
    }

    pub fn set_var(
        &mut self,
        key: impl Into<String>,
        value: VarValue,
        location: Option<ErrorLocation>,
    ) -> Result<(), Error> {
        let key = key.into();
        if self.vars.contains_key(&key) {
            let e = Error::schema(format!(
                "variable {key} is set twice for group {}",
                self.name
            ));
            return match location {
                Some(location) => e.with_location(location).err(),
                None => e.err(),
            };
        }
        self.vars.insert(key, value);
        Ok(())
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.children.iter().any(|c| c.name == name)
    }
}

/// Groups in the order they were first defined.
#[derive(Clone, Debug, Default)]
pub struct RawInventory {
    groups: Vec<GroupConfig>,
    index: HashMap<String, usize>,
    // vars from host_vars files, applied over everything the inventory says
    host_overrides: HashMap<String, VarMap>,
}

impl RawInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[GroupConfig] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut GroupConfig> {
        self.groups.iter_mut()
    }

    pub fn get(&self, name: &str) -> Option<&GroupConfig> {
        self.index.get(name).map(|i| &self.groups[*i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut GroupConfig> {
        let i = *self.index.get(name)?;
        Some(&mut self.groups[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Adds a newly defined group. A second definition of the same name is an
    /// error, never a merge.
    pub fn insert(&mut self, group: GroupConfig) -> Result<&mut GroupConfig, Error> {
        if let Some(existing) = self.get(&group.name) {
            let e = Error::schema(format!("group name {} already exists", group.name));
            let e = match (&group.location, &existing.location) {
                (Some(location), _) | (None, Some(location)) => e.with_location(location.clone()),
                (None, None) => e,
            };
            return e.err();
        }
        let i = self.groups.len();
        self.index.insert(group.name.clone(), i);
        self.groups.push(group);
        Ok(&mut self.groups[i])
    }

    /// The group with `name`, defining an empty one if there is none yet.
    pub fn entry(&mut self, name: &str, location: Option<ErrorLocation>) -> &mut GroupConfig {
        let i = match self.index.get(name) {
            Some(i) => *i,
            None => {
                let i = self.groups.len();
                self.index.insert(name.to_string(), i);
                self.groups.push(GroupConfig::new(name, location));
                i
            }
        };
        &mut self.groups[i]
    }

    /// Host names in the order they first appear in any group.
    pub fn host_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for group in &self.groups {
            for host in &group.hosts {
                if !names.contains(&host.name.as_str()) {
                    names.push(&host.name);
                }
            }
        }
        names
    }

    pub fn override_host_vars(&mut self, host: &str, vars: VarMap) {
        self.host_overrides
            .entry(host.to_string())
            .or_default()
            .extend(vars);
    }

    pub fn host_overrides(&self, host: &str) -> Option<&VarMap> {
        self.host_overrides.get(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_duplicate_group() {
        let mut raw = RawInventory::new();
        raw.insert(GroupConfig::new("web", None)).unwrap();
        let e = raw.insert(GroupConfig::new("web", None)).unwrap_err();
        assert!(e.is_schema());
        assert_eq!(raw.groups().len(), 1);
    }

    #[test]
    fn entry_keeps_first_seen_order() {
        let mut raw = RawInventory::new();
        raw.entry("db", None);
        raw.entry("web", None);
        raw.entry("db", None).vars.insert("port".into(), 5432i64.into());
        let names: Vec<&str> = raw.groups().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["db", "web"]);
        assert_eq!(raw.get("db").unwrap().vars["port"].as_i64(), Some(5432));
    }

    #[test]
    fn group_rejects_self_child_and_duplicate_child() {
        let mut group = GroupConfig::new("prod", None);
        let child = |name: &str| ChildRef {
            name: name.to_string(),
            location: None,
        };
        assert!(group.add_child(child("prod")).unwrap_err().is_schema());
        group.add_child(child("web")).unwrap();
        assert!(group.add_child(child("web")).unwrap_err().is_schema());
        assert!(group.has_child("web"));
    }

    #[test]
    fn group_rejects_duplicate_host_and_var() {
        let mut group = GroupConfig::new("web", None);
        group.add_host(HostEntry::new("node1")).unwrap();
        assert!(group.add_host(HostEntry::new("node1")).is_err());
        group.set_var("env", "prod".into(), None).unwrap();
        assert!(group.set_var("env", "dev".into(), None).is_err());
    }

    #[test]
    fn host_names_are_unique_in_first_seen_order() {
        let mut raw = RawInventory::new();
        raw.entry("a", None).add_host(HostEntry::new("h2")).unwrap();
        raw.entry("b", None).add_host(HostEntry::new("h1")).unwrap();
        raw.entry("b", None).add_host(HostEntry::new("h2")).unwrap();
        assert_eq!(raw.host_names(), vec!["h2", "h1"]);
    }
}
