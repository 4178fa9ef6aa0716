use std::path::{Path, PathBuf};

use invload_common::{
    error::{Error, ErrorKind, ErrorLocation, Origin},
    value::VarMap,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    inventory::{InventoryFormat, InventorySource},
    snapshot::{ConfigSnapshot, GroupRecord, HostRecord},
    vars, vault,
};

pub const CONFIG_FILE: &str = "invload.yml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InventoryConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub group_vars: Option<PathBuf>,
    #[serde(default)]
    pub host_vars: Option<PathBuf>,
    #[serde(default)]
    pub format: Option<InventoryFormat>,
    /// Decrypts the inventory and its `group_vars`/`host_vars`.
    #[serde(default)]
    pub vault_password: Option<String>,
}

impl InventoryConfig {
    pub fn password(&self) -> Option<&str> {
        non_empty(&self.vault_password)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VarFile {
    pub path: PathBuf,
    #[serde(default)]
    pub vault_password: Option<String>,
}

impl VarFile {
    pub fn password(&self) -> Option<&str> {
        non_empty(&self.vault_password)
    }
}

/// A variables file encrypted as a whole. Its variables go over the ones
/// from `var_files`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultFile {
    pub path: PathBuf,
    #[serde(default)]
    pub password: Option<String>,
}

impl VaultFile {
    pub fn password(&self) -> Option<&str> {
        non_empty(&self.password)
    }
}

fn non_empty(password: &Option<String>) -> Option<&str> {
    password.as_deref().filter(|p| !p.is_empty())
}

/// The YAML file that points at an inventory and the variable files that go
/// with it.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionConfig {
    #[serde(default)]
    pub limits: Vec<String>,
    #[serde(default)]
    pub inventory: Option<InventoryConfig>,
    #[serde(default)]
    pub var_files: Vec<VarFile>,
    #[serde(default)]
    pub vaults: Vec<VaultFile>,
}

impl ExtensionConfig {
    pub fn parse(origin: &Origin) -> Result<ExtensionConfig, Error> {
        if origin.data.trim().is_empty() {
            return Error::config("config file is empty")
                .with_location(origin.location_at(1, 1))
                .err();
        }
        let config: Option<ExtensionConfig> = serde_yaml::from_str(&origin.data).map_err(|e| {
            let mut e = Error::from_yaml(e, origin);
            if e.message.contains("unknown field") {
                e.kind = ErrorKind::Config;
            }
            e
        })?;
        let config = config.unwrap_or_default();
        config.validate(origin)?;
        Ok(config)
    }

    pub fn validate(&self, origin: &Origin) -> Result<(), Error> {
        for vault in &self.vaults {
            let msg = if vault.path.as_os_str().is_empty() {
                "vault path is empty"
            } else if vault.password().is_none() {
                "vault path requires password"
            } else {
                continue;
            };
            let e = Error::config(msg);
            return match key_location(origin, "vaults") {
                Some(location) => e.with_location(location).err(),
                None => e.err(),
            };
        }
        if self.inventory.is_none() && self.var_files.is_empty() && self.vaults.is_empty() {
            return Error::config("config needs an inventory, var_files or vaults")
                .with_location(origin.location_at(1, 1))
                .err();
        }
        if self.inventory.is_none() && !self.limits.is_empty() {
            let e = Error::config("limits can only be used with an inventory");
            return match key_location(origin, "limits") {
                Some(location) => e.with_location(location).err(),
                None => e.err(),
            };
        }
        if let Some(inventory) = &self.inventory {
            if inventory.path.as_os_str().is_empty() {
                let e = Error::config("inventory path is empty");
                return match key_location(origin, "path") {
                    Some(location) => e.with_location(location).err(),
                    None => e.err(),
                };
            }
        }
        Ok(())
    }
}

// first line that starts with `key:` after indentation
fn key_location(origin: &Origin, key: &str) -> Option<ErrorLocation> {
    let prefix = format!("{key}:");
    origin.data.lines().enumerate().find_map(|(i, line)| {
        let trimmed = line.trim_start();
        trimmed
            .starts_with(&prefix)
            .then(|| origin.location_at(i + 1, line.len() - trimmed.len() + 1))
    })
}

/// What a config file resolves to: the inventory as records, ready to be
/// serialized, and the merged `var_files` and `vaults`.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedConfig {
    pub group_config: Vec<GroupRecord>,
    pub host_config: Vec<HostRecord>,
    pub global_config: VarMap,
    #[serde(skip)]
    snapshot: Option<ConfigSnapshot>,
}

impl LoadedConfig {
    /// The full inventory, `limits` not applied.
    pub fn snapshot(&self) -> Option<&ConfigSnapshot> {
        self.snapshot.as_ref()
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<LoadedConfig, Error> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Error::config("config path is empty").err();
    }
    let origin = Origin::read(path)?;
    let config = ExtensionConfig::parse(&origin)?;
    debug!(path = %path.display(), "loading config");

    let mut global_config = VarMap::new();
    for var_file in &config.var_files {
        let path = resolve(&origin, &var_file.path);
        let vars = vars::read_vars_file(&path, var_file.password())?;
        global_config.extend(vars);
    }
    for vault_file in &config.vaults {
        let Some(password) = vault_file.password() else {
            continue;
        };
        let vars = vars::read_vault_file(&resolve(&origin, &vault_file.path), password)?;
        global_config.extend(vars);
    }

    let Some(inventory) = &config.inventory else {
        return Ok(LoadedConfig {
            group_config: Vec::new(),
            host_config: Vec::new(),
            global_config,
            snapshot: None,
        });
    };

    let password = inventory.password();
    let source = open_inventory(&resolve(&origin, &inventory.path), inventory.format, password)?;
    let mut raw = source.parse()?;
    if let Some(password) = password {
        for group in raw.groups_mut() {
            vault::decrypt_vars(&mut group.vars, password)
                .map_err(|e| for_owner(e, &group.name))?;
            for host in &mut group.hosts {
                vault::decrypt_vars(&mut host.vars, password)
                    .map_err(|e| for_owner(e, &host.name))?;
            }
        }
    }
    if let Some(dir) = &inventory.group_vars {
        vars::apply_group_vars(&mut raw, &resolve(&origin, dir), password)?;
    }
    if let Some(dir) = &inventory.host_vars {
        vars::apply_host_vars(&mut raw, &resolve(&origin, dir), password)?;
    }
    let snapshot = ConfigSnapshot::build(raw, source.origin.path.clone(), source.format)?;

    for limit in &config.limits {
        if snapshot.group(limit).is_none() {
            warn!(group = limit, "limit names a group that isn't in the inventory");
        }
    }
    let group_config = snapshot
        .group_config()
        .into_iter()
        .filter(|g| !config.limits.contains(&g.group_name))
        .collect();

    Ok(LoadedConfig {
        group_config,
        host_config: snapshot.host_config(),
        global_config,
        snapshot: Some(snapshot),
    })
}

// an inventory may itself be a vault
fn open_inventory(
    path: &Path,
    format: Option<InventoryFormat>,
    password: Option<&str>,
) -> Result<InventorySource, Error> {
    let source = InventorySource::open(path, format)?;
    if !vault::is_encrypted(&source.origin.data) {
        return Ok(source);
    }
    let Some(password) = password else {
        return Error::config(format!(
            "inventory {} is vault encrypted and has no vault_password",
            path.display()
        ))
        .err();
    };
    let data = vault::decrypt(&source.origin.data, password).map_err(|e| {
        Error::new(e.kind, format!("{}: {}", path.display(), e.message))
    })?;
    Ok(InventorySource::from_string(path, data, format))
}

fn for_owner(e: Error, owner: &str) -> Error {
    Error::new(e.kind, format!("{owner}: {}", e.message))
}

fn resolve(origin: &Origin, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        origin.cwd.join(path)
    }
}

/// Looks for `invload.yml` in `dir` and then in each of its parents.
pub fn find_config(dir: &Path) -> Result<PathBuf, Error> {
    let mut dir = Some(dir);
    while let Some(current) = dir {
        let path = current.join(CONFIG_FILE);
        if path.is_file() {
            return Ok(path);
        }
        dir = current.parent();
    }
    Error::not_found(format!("can't find {CONFIG_FILE}")).err()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &str) -> Result<ExtensionConfig, Error> {
        ExtensionConfig::parse(&Origin::new(PathBuf::from("invload.yml"), data.to_string()))
    }

    #[test]
    fn full_config() {
        let config = parse(
            "inventory:\n  path: hosts.yml\n  group_vars: group_vars\n  format: ini\nvar_files:\n  - path: common.yml\nlimits: [staging]\n",
        )
        .unwrap();
        let inventory = config.inventory.unwrap();
        assert_eq!(inventory.path, PathBuf::from("hosts.yml"));
        assert_eq!(inventory.group_vars, Some(PathBuf::from("group_vars")));
        assert_eq!(inventory.host_vars, None);
        assert_eq!(inventory.format, Some(InventoryFormat::Ini));
        assert_eq!(config.var_files.len(), 1);
        assert_eq!(config.limits, vec!["staging"]);
    }

    #[test]
    fn needs_inventory_or_var_files() {
        assert!(parse("limits: []\n").unwrap_err().is_config());
        assert!(parse("").unwrap_err().is_config());
        assert!(parse("---\n").unwrap_err().is_config());
        parse("var_files:\n  - path: a.yml\n").unwrap();
    }

    #[test]
    fn limits_need_inventory() {
        let e = parse("var_files:\n  - path: a.yml\nlimits:\n  - web\n").unwrap_err();
        assert!(e.is_config());
        assert_eq!(e.location.unwrap().line, 3);
    }

    #[test]
    fn vault_passwords_and_vaults() {
        let config = parse(
            "inventory:\n  path: hosts\n  vault_password: inv\nvar_files:\n  - path: a.yml\n    vault_password: vars\n  - path: b.yml\nvaults:\n  - path: secrets.yml\n    password: S3Cret!\n",
        )
        .unwrap();
        assert_eq!(config.inventory.unwrap().password(), Some("inv"));
        assert_eq!(config.var_files[0].password(), Some("vars"));
        assert_eq!(config.var_files[1].password(), None);
        assert_eq!(config.vaults[0].path, PathBuf::from("secrets.yml"));
        assert_eq!(config.vaults[0].password(), Some("S3Cret!"));

        // a vault on its own is enough
        parse("vaults:\n  - path: secrets.yml\n    password: pw\n").unwrap();
    }

    #[test]
    fn vault_path_requires_password() {
        for data in [
            "inventory:\n  path: hosts\nvaults:\n  - path: secrets.yml\n",
            "inventory:\n  path: hosts\nvaults:\n  - path: secrets.yml\n    password: \"\"\n",
        ] {
            let e = parse(data).unwrap_err();
            assert!(e.is_config());
            assert_eq!(e.message, "vault path requires password");
            assert_eq!(e.location.unwrap().line, 3);
        }
        assert!(parse("vaults:\n  - path: \"\"\n    password: pw\n")
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn unknown_keys_are_config_errors() {
        let e = parse("inventory:\n  path: hosts\nvault:\n  password_file: .pw\n").unwrap_err();
        assert!(e.is_config());
        assert!(e.message.contains("vault"));
    }

    #[test]
    fn empty_inventory_path() {
        let e = parse("inventory:\n  path: \"\"\n").unwrap_err();
        assert!(e.is_config());
        assert_eq!(e.location.unwrap().line, 2);
    }

    #[test]
    fn find_config_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "var_files: []\n").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_config(&nested).unwrap(), dir.path().join(CONFIG_FILE));
    }
}
