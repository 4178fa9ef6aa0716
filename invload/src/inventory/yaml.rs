use std::{
    collections::{HashMap, HashSet},
    fmt,
    marker::PhantomData,
};

use invload_common::{
    error::{Error, ErrorKind, ErrorLocation, Origin},
    value::{var_map_from_yaml, VarMap},
};
use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer,
};

use crate::group::{ChildRef, GroupConfig, HostEntry, RawInventory};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlGroup {
    #[serde(default)]
    hosts: Option<Entries<serde_yaml::Mapping>>,
    #[serde(default)]
    vars: Option<serde_yaml::Mapping>,
    #[serde(default)]
    children: Option<Entries<YamlGroup>>,
}

/// Mapping entries in document order. Unlike a map type, repeated keys are
/// kept so they can be reported against the inventory rules.
#[derive(Debug)]
struct Entries<T>(Vec<(String, Option<T>)>);

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Entries<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = Entries<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, Option<T>>()? {
                    entries.push(entry);
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

impl YamlGroup {
    fn is_reference(&self) -> bool {
        self.hosts.is_none() && self.vars.is_none() && self.children.is_none()
    }
}

/// Parses a YAML (or JSON) inventory: a mapping of group names to
/// `{hosts, vars, children}`.
pub fn parse(origin: &Origin) -> Result<RawInventory, Error> {
    if origin.data.trim().is_empty() {
        return Ok(RawInventory::new());
    }

    let root: Option<Entries<YamlGroup>> =
        serde_yaml::from_str(&origin.data).map_err(|e| Error::from_yaml(e, origin))?;
    let Some(root) = root else {
        return Ok(RawInventory::new());
    };

    let mut parser = YamlParser {
        origin,
        raw: RawInventory::new(),
        defined: HashSet::new(),
        seen: HashMap::new(),
    };
    parser.parse_groups(root, None)?;
    Ok(parser.raw)
}

struct YamlParser<'a> {
    origin: &'a Origin,
    raw: RawInventory,
    // groups that came with hosts, vars or children
    defined: HashSet<String>,
    // occurrences of each group key so far, to find the right line
    seen: HashMap<String, usize>,
}

impl YamlParser<'_> {
    /// Groups of one mapping, the root or a `children` block. A key repeated
    /// in the same mapping is a duplicate group, even when both are empty.
    fn parse_groups(
        &mut self,
        groups: Entries<YamlGroup>,
        parent: Option<&str>,
    ) -> Result<(), Error> {
        let mut names = HashSet::new();
        for (name, group) in groups.0 {
            if !names.insert(name.clone()) {
                let location = self.next_location(&name);
                let msg = match parent {
                    Some(parent) => format!("group {name} is listed twice under {parent}"),
                    None => format!("group {name} is defined twice"),
                };
                return self.error(ErrorKind::Schema, msg, location).err();
            }
            self.parse_group(&name, group.unwrap_or_default(), parent)?;
        }
        Ok(())
    }

    fn next_location(&mut self, key: &str) -> Option<ErrorLocation> {
        let nth = self.seen.entry(key.to_string()).or_insert(0);
        *nth += 1;
        key_location(self.origin, key, *nth)
    }

    fn parse_group(
        &mut self,
        name: &str,
        group: YamlGroup,
        parent: Option<&str>,
    ) -> Result<(), Error> {
        let location = self.next_location(name);

        if name.trim().is_empty() {
            return self.error(ErrorKind::Parse, "group name is empty", location).err();
        }

        if !group.is_reference() && !self.defined.insert(name.to_string()) {
            return self
                .error(
                    ErrorKind::Schema,
                    format!("group name {name} already exists"),
                    location,
                )
                .err();
        }
        if !self.raw.contains(name) {
            self.raw.insert(GroupConfig::new(name, location.clone()))?;
        }

        if let Some(parent) = parent {
            if let Some(parent) = self.raw.get_mut(parent) {
                parent.add_child(ChildRef {
                    name: name.to_string(),
                    location: location.clone(),
                })?;
            }
        }

        if let Some(vars) = group.vars {
            let vars = self.vars(vars, name, &location)?;
            if let Some(config) = self.raw.get_mut(name) {
                for (key, value) in vars {
                    config.set_var(key, value, location.clone())?;
                }
            }
        }

        for (host, vars) in group.hosts.map(|h| h.0).unwrap_or_default() {
            let vars = match vars {
                Some(vars) => self.vars(vars, &host, &location)?,
                None => VarMap::new(),
            };
            if let Some(config) = self.raw.get_mut(name) {
                config.add_host(HostEntry {
                    name: host,
                    vars,
                    location: location.clone(),
                })?;
            }
        }

        if let Some(children) = group.children {
            self.parse_groups(children, Some(name))?;
        }

        Ok(())
    }

    fn vars(
        &self,
        vars: serde_yaml::Mapping,
        owner: &str,
        location: &Option<ErrorLocation>,
    ) -> Result<VarMap, Error> {
        var_map_from_yaml(vars)
            .map_err(|e| self.error(ErrorKind::Parse, format!("{owner}: {e}"), location.clone()))
    }

    fn error(&self, kind: ErrorKind, msg: impl Into<String>, location: Option<ErrorLocation>) -> Error {
        let e = Error::new(kind, msg);
        match location {
            Some(location) => e.with_location(location),
            None => e,
        }
    }
}

/// Line of the `nth` mapping key spelled `key`, in either block (`key:`) or
/// JSON (`"key":`) style.
fn key_location(origin: &Origin, key: &str, nth: usize) -> Option<ErrorLocation> {
    let block = format!("{key}:");
    let quoted = format!("\"{key}\":");
    let single = format!("'{key}':");
    let (line, column) = origin
        .data
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let trimmed = line.trim_start();
            let column = line.len() - trimmed.len() + 1;
            let trimmed = trimmed.trim_start_matches(['{', ' ']);
            (trimmed.starts_with(&block)
                || trimmed.starts_with(&quoted)
                || trimmed.starts_with(&single))
            .then_some((i + 1, column))
        })
        .nth(nth.checked_sub(1)?)?;
    Some(origin.location_at(line, column))
}
