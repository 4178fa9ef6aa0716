use std::{fs, path::Path};

use invload::{load_config, VarValue};
use tempfile::TempDir;

/// `db_password: hunter2`, `replicas: 5`, password `S3Cret!`.
const SECRETS: &str = include_str!("fixtures/secrets.vault");
/// `s3cr3t-token`, password `testpassword`.
const TOKEN: &str = include_str!("fixtures/token.vault");
/// `web` with host `w1` (`port: 8080`), password `S3Cret!`.
const INVENTORY: &str = include_str!("fixtures/inventory.vault");

fn inline_vault(key: &str) -> String {
    let indented: String = TOKEN.lines().map(|l| format!("  {l}\n")).collect();
    format!("{key}: !vault |\n{indented}")
}

fn write(dir: &Path, name: &str, data: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, data).unwrap();
}

fn project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "inventory/hosts.ini",
        "[web]\nw1\nw2 port=8443\n\n[web:vars]\nport=80\n\n[staging]\ns1\n",
    );
    write(dir.path(), "inventory/group_vars/web.yml", "port: 443\ntls: true\n");
    write(dir.path(), "inventory/group_vars/all/common.yml", "ntp: pool.ntp.org\n");
    write(dir.path(), "inventory/host_vars/w2.yml", "port: 9443\n");
    write(dir.path(), "vars/common.yml", "region: eu\nreplicas: 2\n");
    write(dir.path(), "vars/override.yml", "replicas: 3\n");
    dir
}

#[test]
fn config_with_inventory_and_vars() {
    let dir = project();
    write(
        dir.path(),
        "invload.yml",
        r#"
inventory:
  path: inventory/hosts.ini
  group_vars: inventory/group_vars
  host_vars: inventory/host_vars
var_files:
  - path: vars/common.yml
  - path: vars/override.yml
limits:
  - staging
"#,
    );

    let loaded = load_config(dir.path().join("invload.yml")).unwrap();

    let names: Vec<&str> = loaded
        .group_config
        .iter()
        .map(|g| g.group_name.as_str())
        .collect();
    assert_eq!(names, vec!["web", "all"]);
    assert!(loaded.snapshot().unwrap().group("staging").is_some());

    let web = &loaded.group_config[0];
    let var = |name: &str| {
        web.group_vars
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.clone())
    };
    assert_eq!(var("port").and_then(|v| v.as_i64()), Some(443));
    assert_eq!(var("tls").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(var("ntp"), Some(VarValue::from("pool.ntp.org")));

    let w2 = loaded
        .host_config
        .iter()
        .find(|h| h.host_name == "w2")
        .unwrap();
    let port = w2.host_vars.iter().find(|v| v.name == "port").unwrap();
    assert_eq!(port.value.as_i64(), Some(9443));

    assert_eq!(loaded.global_config["region"].as_str(), Some("eu"));
    assert_eq!(loaded.global_config["replicas"].as_i64(), Some(3));
}

#[test]
fn config_serializes_to_json() {
    let dir = project();
    write(
        dir.path(),
        "invload.yml",
        "inventory:\n  path: inventory/hosts.ini\nlimits: [web, all]\n",
    );
    let loaded = load_config(dir.path().join("invload.yml")).unwrap();
    let json = serde_json::to_value(&loaded).unwrap();
    assert_eq!(
        json["group_config"],
        serde_json::json!([{"group_name": "staging", "group_vars": [], "hosts": ["s1"]}])
    );
    assert_eq!(json["global_config"], serde_json::json!({}));
    assert!(json.get("snapshot").is_none());
}

#[test]
fn var_files_only() {
    let dir = project();
    write(dir.path(), "invload.yml", "var_files:\n  - path: vars/common.yml\n");
    let loaded = load_config(dir.path().join("invload.yml")).unwrap();
    assert!(loaded.group_config.is_empty());
    assert!(loaded.snapshot().is_none());
    assert_eq!(loaded.global_config.len(), 2);
}

#[test]
fn unknown_limit_is_not_an_error() {
    let dir = project();
    write(
        dir.path(),
        "invload.yml",
        "inventory:\n  path: inventory/hosts.ini\nlimits: [ghost]\n",
    );
    let loaded = load_config(dir.path().join("invload.yml")).unwrap();
    assert_eq!(loaded.group_config.len(), 3);
}

#[test]
fn missing_pieces_are_not_found() {
    let dir = project();
    assert!(load_config(dir.path().join("invload.yml"))
        .unwrap_err()
        .is_not_found());

    write(dir.path(), "a.yml", "inventory:\n  path: nope.ini\n");
    assert!(load_config(dir.path().join("a.yml")).unwrap_err().is_not_found());

    write(
        dir.path(),
        "b.yml",
        "inventory:\n  path: inventory/hosts.ini\n  group_vars: nope\n",
    );
    assert!(load_config(dir.path().join("b.yml")).unwrap_err().is_not_found());

    write(dir.path(), "c.yml", "var_files:\n  - path: vars/nope.yml\n");
    assert!(load_config(dir.path().join("c.yml")).unwrap_err().is_not_found());
}

#[test]
fn invalid_configs() {
    let dir = project();
    assert!(load_config("").unwrap_err().is_config());

    write(dir.path(), "a.yml", "limits: [web]\nvar_files:\n  - path: vars/common.yml\n");
    assert!(load_config(dir.path().join("a.yml")).unwrap_err().is_config());

    write(dir.path(), "b.yml", "inventory:\n  path: inventory/hosts.ini\n  vault_password_file: x\n");
    assert!(load_config(dir.path().join("b.yml")).unwrap_err().is_config());

    write(dir.path(), "c.yml", "inventory: [\n");
    assert!(load_config(dir.path().join("c.yml")).unwrap_err().is_parse());
}

#[test]
fn inventory_errors_pass_through() {
    let dir = project();
    write(dir.path(), "bad.ini", "[a:children]\nb\n\n[b:children]\na\n");
    write(dir.path(), "invload.yml", "inventory:\n  path: bad.ini\n");
    assert!(load_config(dir.path().join("invload.yml"))
        .unwrap_err()
        .is_schema());
}

#[test]
fn vaults_merge_over_var_files() {
    let dir = project();
    write(dir.path(), "secrets.yml", SECRETS);
    write(
        dir.path(),
        "invload.yml",
        "var_files:\n  - path: vars/common.yml\nvaults:\n  - path: secrets.yml\n    password: S3Cret!\n",
    );
    let loaded = load_config(dir.path().join("invload.yml")).unwrap();
    assert_eq!(loaded.global_config["region"].as_str(), Some("eu"));
    assert_eq!(loaded.global_config["db_password"].as_str(), Some("hunter2"));
    // the vault wins over var_files
    assert_eq!(loaded.global_config["replicas"].as_i64(), Some(5));
}

#[test]
fn vault_errors() {
    let dir = project();
    write(dir.path(), "secrets.yml", SECRETS);

    write(
        dir.path(),
        "a.yml",
        "vaults:\n  - path: secrets.yml\n    password: wrong\n",
    );
    assert!(load_config(dir.path().join("a.yml")).unwrap_err().is_config());

    write(dir.path(), "b.yml", "vaults:\n  - path: nope.yml\n    password: S3Cret!\n");
    assert!(load_config(dir.path().join("b.yml")).unwrap_err().is_not_found());

    write(dir.path(), "c.yml", "vaults:\n  - path: secrets.yml\n");
    let e = load_config(dir.path().join("c.yml")).unwrap_err();
    assert!(e.is_config());
    assert!(e.message.contains("requires password"), "{}", e.message);
}

#[test]
fn var_file_with_vault_password() {
    let dir = project();
    write(
        dir.path(),
        "vars/secret.yml",
        &format!("{}user: deploy\n", inline_vault("api_token")),
    );
    write(
        dir.path(),
        "invload.yml",
        "var_files:\n  - path: vars/secret.yml\n    vault_password: testpassword\n",
    );
    let loaded = load_config(dir.path().join("invload.yml")).unwrap();
    assert_eq!(loaded.global_config["api_token"].as_str(), Some("s3cr3t-token"));
    assert_eq!(loaded.global_config["user"].as_str(), Some("deploy"));
}

#[test]
fn inventory_vault_password_covers_vars_dirs() {
    let dir = project();
    write(dir.path(), "inventory/group_vars/web.yml", &inline_vault("db_token"));
    write(dir.path(), "inventory/host_vars/w2.yml", SECRETS);
    write(
        dir.path(),
        "invload.yml",
        "inventory:\n  path: inventory/hosts.ini\n  group_vars: inventory/group_vars\n  host_vars: inventory/host_vars\n  vault_password: testpassword\n",
    );
    // host_vars/w2.yml is under another password
    assert!(load_config(dir.path().join("invload.yml"))
        .unwrap_err()
        .is_config());

    write(dir.path(), "inventory/host_vars/w2.yml", "port: 9443\n");
    let loaded = load_config(dir.path().join("invload.yml")).unwrap();
    let web = loaded
        .group_config
        .iter()
        .find(|g| g.group_name == "web")
        .unwrap();
    let token = web.group_vars.iter().find(|v| v.name == "db_token").unwrap();
    assert_eq!(token.value, VarValue::from("s3cr3t-token"));
}

#[test]
fn encrypted_inventory() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "hosts.yml", INVENTORY);
    write(
        dir.path(),
        "invload.yml",
        "inventory:\n  path: hosts.yml\n  vault_password: S3Cret!\n",
    );
    let loaded = load_config(dir.path().join("invload.yml")).unwrap();
    let w1 = &loaded.host_config[0];
    assert_eq!(w1.host_name, "w1");
    assert_eq!(w1.host_vars[0].value.as_i64(), Some(8080));

    write(dir.path(), "invload.yml", "inventory:\n  path: hosts.yml\n");
    assert!(load_config(dir.path().join("invload.yml"))
        .unwrap_err()
        .is_config());
}

#[test]
fn inline_vault_in_inventory() {
    let dir = tempfile::tempdir().unwrap();
    let token: String = TOKEN.lines().map(|l| format!("          {l}\n")).collect();
    write(
        dir.path(),
        "hosts.yml",
        &format!("web:\n  hosts:\n    w1:\n      api_token: !vault |\n{token}"),
    );
    write(
        dir.path(),
        "invload.yml",
        "inventory:\n  path: hosts.yml\n  vault_password: testpassword\n",
    );
    let loaded = load_config(dir.path().join("invload.yml")).unwrap();
    let w1 = &loaded.host_config[0];
    assert_eq!(w1.host_vars[0].value, VarValue::from("s3cr3t-token"));
}
