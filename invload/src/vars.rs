//! `group_vars` and `host_vars` directories.
//!
//! Inside such a directory, `web.yml` (or `.yaml`, `.json`, or no extension)
//! holds variables for `web`, and so does every file below a `web/`
//! subdirectory. Files are merged in path order, later ones winning.
//!
//! With a vault password, whole-file vaults and `!vault` values in these
//! files are decrypted as they are read.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use invload_common::{
    error::{Error, Origin},
    value::{var_map_from_yaml, VarMap},
};
use tracing::debug;

use crate::{group::RawInventory, resolve::ALL, vault};

const EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

/// Merges `<dir>/<group>` files over the vars each group got from the
/// inventory.
pub fn apply_group_vars(
    raw: &mut RawInventory,
    dir: &Path,
    password: Option<&str>,
) -> Result<(), Error> {
    for (name, files) in scan(dir)? {
        // `all` may only come into being when the inventory is resolved
        let group = if name == ALL {
            Some(raw.entry(ALL, None))
        } else {
            raw.get_mut(&name)
        };
        let Some(group) = group else {
            debug!(dir = %dir.display(), name, "no group for group_vars entry");
            continue;
        };
        for file in files {
            group.vars.extend(read_vars_file(&file, password)?);
        }
    }
    Ok(())
}

/// Reads `<dir>/<host>` files; they win over every var the inventory gives
/// the host.
pub fn apply_host_vars(
    raw: &mut RawInventory,
    dir: &Path,
    password: Option<&str>,
) -> Result<(), Error> {
    let hosts: HashSet<String> = raw.host_names().into_iter().map(String::from).collect();
    for (name, files) in scan(dir)? {
        if !hosts.contains(&name) {
            debug!(dir = %dir.display(), name, "no host for host_vars entry");
            continue;
        }
        for file in files {
            let vars = read_vars_file(&file, password)?;
            raw.override_host_vars(&name, vars);
        }
    }
    Ok(())
}

/// A YAML or JSON mapping of variables. An empty file has no variables.
/// Vault strings are only decrypted when there is a `password`, otherwise
/// they stay as they are.
pub fn read_vars_file(path: &Path, password: Option<&str>) -> Result<VarMap, Error> {
    let mut origin = Origin::read(path)?;
    if vault::is_encrypted(&origin.data) {
        let Some(password) = password else {
            return Error::config(format!(
                "{} is vault encrypted and has no vault password",
                path.display()
            ))
            .err();
        };
        origin = decrypt_origin(origin, password)?;
    }
    let mut vars = parse_vars(&origin)?;
    if let Some(password) = password {
        vault::decrypt_vars(&mut vars, password).map_err(|e| in_file(e, &origin))?;
    }
    Ok(vars)
}

/// A file from the `vaults` section: a variables mapping encrypted as a whole.
pub fn read_vault_file(path: &Path, password: &str) -> Result<VarMap, Error> {
    let origin = Origin::read(path)?;
    if !vault::is_encrypted(&origin.data) {
        return Error::parse(format!("{} isn't a vault file", path.display()))
            .with_location(origin.location_at(1, 1))
            .err();
    }
    let origin = decrypt_origin(origin, password)?;
    let mut vars = parse_vars(&origin)?;
    vault::decrypt_vars(&mut vars, password).map_err(|e| in_file(e, &origin))?;
    Ok(vars)
}

// error lines point into the plaintext from here on
fn decrypt_origin(origin: Origin, password: &str) -> Result<Origin, Error> {
    let data = vault::decrypt(&origin.data, password).map_err(|e| in_file(e, &origin))?;
    Ok(Origin::new(origin.path, data))
}

fn in_file(e: Error, origin: &Origin) -> Error {
    Error::new(e.kind, format!("{}: {}", origin.path.display(), e.message))
}

fn parse_vars(origin: &Origin) -> Result<VarMap, Error> {
    if origin.data.trim().is_empty() {
        return Ok(VarMap::new());
    }
    let value: serde_yaml::Value =
        serde_yaml::from_str(&origin.data).map_err(|e| Error::from_yaml(e, origin))?;
    match value {
        serde_yaml::Value::Null => Ok(VarMap::new()),
        serde_yaml::Value::Mapping(mapping) => var_map_from_yaml(mapping)
            .map_err(|e| Error::parse(e).with_location(origin.location_at(1, 1))),
        other => Error::parse(format!(
            "variables file should be a mapping, found {}",
            kind(&other)
        ))
        .with_location(origin.location_at(1, 1))
        .err(),
    }
}

fn kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a bool",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a list",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

/// Names found in `dir`, each with its files in the order they apply.
fn scan(dir: &Path) -> Result<Vec<(String, Vec<PathBuf>)>, Error> {
    if !dir.is_dir() {
        return Error::not_found(format!("vars directory {} doesn't exist", dir.display())).err();
    }

    let mut entries: Vec<(String, Vec<PathBuf>)> = Vec::new();
    for path in list(dir)? {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }

        let (name, files) = if path.is_dir() {
            let mut files = Vec::new();
            collect_files(&path, &mut files)?;
            (file_name.to_string(), files)
        } else {
            match path.extension().and_then(|e| e.to_str()) {
                None => (file_name.to_string(), vec![path.clone()]),
                Some(ext) if EXTENSIONS.contains(&ext) => {
                    let stem = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or(file_name);
                    (stem.to_string(), vec![path.clone()])
                }
                Some(_) => {
                    debug!(path = %path.display(), "skipping file with unknown extension");
                    continue;
                }
            }
        };

        match entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => existing.extend(files),
            None => entries.push((name, files)),
        }
    }
    Ok(entries)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), Error> {
    for path in list(dir)? {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(true);
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn list(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let read_dir = fs::read_dir(dir)
        .map_err(|e| Error::not_found(format!("can't read directory {}: {e}", dir.display())))?;
    let mut paths = Vec::new();
    for entry in read_dir {
        let entry = entry
            .map_err(|e| Error::not_found(format!("can't read directory {}: {e}", dir.display())))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use crate::{
        group::HostEntry,
        vault::tests::{VAULT_FILE, VAULT_STRING},
    };

    use super::*;

    fn write(dir: &Path, name: &str, data: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, data).unwrap();
    }

    fn inventory() -> RawInventory {
        let mut raw = RawInventory::new();
        let web = raw.entry("web", None);
        web.vars.insert("env".into(), "dev".into());
        web.add_host(HostEntry::new("w1")).unwrap();
        raw
    }

    #[test]
    fn group_vars_file_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "web.yml", "env: prod\nport: 80\n");
        write(dir.path(), "web/10-tls.yaml", "tls: true\n");
        write(dir.path(), "web/20-port.json", "{\"port\": 443}");
        write(dir.path(), "ghost.yml", "x: 1\n");
        write(dir.path(), "README.md", "not vars");

        let mut raw = inventory();
        apply_group_vars(&mut raw, dir.path(), None).unwrap();
        let web = raw.get("web").unwrap();
        assert_eq!(web.vars["env"].as_str(), Some("prod"));
        assert_eq!(web.vars["tls"].as_bool(), Some(true));
        // `web.yml` sorts after `web/`
        assert_eq!(web.vars["port"].as_i64(), Some(80));
        assert!(raw.get("ghost").is_none());
    }

    #[test]
    fn group_vars_for_all_before_it_exists() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "all.yml", "ntp: pool.ntp.org\n");
        let mut raw = inventory();
        apply_group_vars(&mut raw, dir.path(), None).unwrap();
        assert_eq!(raw.get("all").unwrap().vars["ntp"].as_str(), Some("pool.ntp.org"));
    }

    #[test]
    fn host_vars_become_overrides() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "w1", "ansible_port: 2222\n");
        let mut raw = inventory();
        apply_host_vars(&mut raw, dir.path(), None).unwrap();
        assert_eq!(
            raw.host_overrides("w1").unwrap()["ansible_port"].as_i64(),
            Some(2222)
        );
    }

    #[test]
    fn missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let e = apply_group_vars(&mut inventory(), &dir.path().join("nope"), None).unwrap_err();
        assert!(e.is_not_found());
    }

    #[test]
    fn vars_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "list.yml", "- a\n- b\n");
        write(dir.path(), "broken.yml", "a: [1, 2\n");
        write(dir.path(), "empty.yml", "");
        assert!(read_vars_file(&dir.path().join("list.yml"), None).unwrap_err().is_parse());
        assert!(read_vars_file(&dir.path().join("broken.yml"), None).unwrap_err().is_parse());
        assert!(read_vars_file(&dir.path().join("empty.yml"), None).unwrap().is_empty());
        assert!(read_vars_file(&dir.path().join("missing.yml"), None)
            .unwrap_err()
            .is_not_found());
    }

    fn inline_vault(name: &str) -> String {
        let indented: String = VAULT_STRING.lines().map(|l| format!("  {l}\n")).collect();
        format!("{name}: !vault |\n{indented}plain: yes\n")
    }

    #[test]
    fn inline_vault_values() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "web.yml", &inline_vault("token"));

        let mut raw = inventory();
        apply_group_vars(&mut raw, dir.path(), Some("testpassword")).unwrap();
        let web = raw.get("web").unwrap();
        assert_eq!(web.vars["token"].as_str(), Some("s3cr3t-token"));
        assert_eq!(web.vars["plain"].as_str(), Some("yes"));

        // without a password the ciphertext is kept
        let vars = read_vars_file(&dir.path().join("web.yml"), None).unwrap();
        assert!(vault::is_encrypted(vars["token"].as_str().unwrap()));

        let e = read_vars_file(&dir.path().join("web.yml"), Some("wrong")).unwrap_err();
        assert!(e.is_config());
        assert!(e.message.contains("token"), "{}", e.message);
    }

    #[test]
    fn whole_file_vault() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "w1.yml", VAULT_FILE);

        let mut raw = inventory();
        apply_host_vars(&mut raw, dir.path(), Some("S3Cret!")).unwrap();
        let overrides = raw.host_overrides("w1").unwrap();
        assert_eq!(overrides["db_password"].as_str(), Some("hunter2"));
        assert_eq!(overrides["replicas"].as_i64(), Some(5));

        let vars = read_vault_file(&dir.path().join("w1.yml"), "S3Cret!").unwrap();
        assert_eq!(vars.len(), 2);

        assert!(read_vars_file(&dir.path().join("w1.yml"), None)
            .unwrap_err()
            .is_config());
        write(dir.path(), "plain.yml", "a: 1\n");
        assert!(read_vault_file(&dir.path().join("plain.yml"), "S3Cret!")
            .unwrap_err()
            .is_parse());
    }
}
