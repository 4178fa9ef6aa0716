pub mod blocks;
pub mod ini;
pub mod range;
pub mod yaml;

use std::path::{Path, PathBuf};

use invload_common::error::{Error, Origin};
use serde::Deserialize;
use tracing::debug;

use crate::{group::RawInventory, snapshot::ConfigSnapshot};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum InventoryFormat {
    #[strum(serialize = "ini")]
    Ini,
    #[strum(to_string = "yaml", serialize = "yml", serialize = "json")]
    #[serde(alias = "yml", alias = "json")]
    Yaml,
    #[strum(serialize = "hcl")]
    Hcl,
}

impl InventoryFormat {
    pub fn from_extension(path: &Path) -> Option<InventoryFormat> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "yml" | "yaml" | "json" => Some(InventoryFormat::Yaml),
            "ini" | "cfg" => Some(InventoryFormat::Ini),
            "hcl" => Some(InventoryFormat::Hcl),
            _ => None,
        }
    }

    /// Guesses the grammar from the first line that isn't blank or a comment.
    /// Text that looks like nothing else is handed to the INI parser, which
    /// rejects what isn't an inventory.
    pub fn sniff(data: &str) -> InventoryFormat {
        let Some(line) = data
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with(';'))
        else {
            return InventoryFormat::Ini;
        };

        if line.starts_with('[') {
            if line.ends_with(']') && !line.contains(',') {
                return InventoryFormat::Ini;
            }
            return InventoryFormat::Yaml;
        }
        if line.starts_with('{') || line == "---" || line.starts_with("--- ") {
            return InventoryFormat::Yaml;
        }
        if (line.starts_with("group ") || line.starts_with("group\"")) && line.ends_with('{') {
            return InventoryFormat::Hcl;
        }
        if let Some(key) = line.strip_suffix(':').or_else(|| line.split_once(": ").map(|(k, _)| k)) {
            let key = key.trim_matches(['"', '\'']);
            if !key.is_empty() && !key.contains(char::is_whitespace) && !key.contains('=') {
                return InventoryFormat::Yaml;
            }
        }
        InventoryFormat::Ini
    }
}

/// An inventory file read into memory along with the grammar it's written in.
pub struct InventorySource {
    pub origin: Origin,
    pub format: InventoryFormat,
}

impl InventorySource {
    /// Reads `path`. Without an explicit `format`, the file extension decides,
    /// then the content.
    pub fn open(path: impl AsRef<Path>, format: Option<InventoryFormat>) -> Result<Self, Error> {
        let origin = Origin::read(path.as_ref())?;
        Ok(Self::from_origin(origin, format))
    }

    pub fn from_string(
        path: impl Into<PathBuf>,
        data: impl Into<String>,
        format: Option<InventoryFormat>,
    ) -> Self {
        Self::from_origin(Origin::new(path.into(), data.into()), format)
    }

    fn from_origin(origin: Origin, format: Option<InventoryFormat>) -> Self {
        let format = format
            .or_else(|| InventoryFormat::from_extension(&origin.path))
            .unwrap_or_else(|| InventoryFormat::sniff(&origin.data));
        debug!(path = %origin.path.display(), %format, "reading inventory");
        Self { origin, format }
    }

    /// The raw group tree, before `all` is synthesized or anything inherited.
    pub fn parse(&self) -> Result<RawInventory, Error> {
        match self.format {
            InventoryFormat::Ini => ini::parse(&self.origin),
            InventoryFormat::Yaml => yaml::parse(&self.origin),
            InventoryFormat::Hcl => blocks::parse(&self.origin),
        }
    }

    pub fn load(&self) -> Result<ConfigSnapshot, Error> {
        let raw = self.parse()?;
        ConfigSnapshot::build(raw, self.origin.path.clone(), self.format)
    }
}

/// Loads the inventory at `path` into a resolved snapshot. Every call reads
/// and parses the file again.
pub fn load(path: impl AsRef<Path>) -> Result<ConfigSnapshot, Error> {
    InventorySource::open(path, None)?.load()
}

pub fn load_with_format(
    path: impl AsRef<Path>,
    format: Option<InventoryFormat>,
) -> Result<ConfigSnapshot, Error> {
    InventorySource::open(path, format)?.load()
}
