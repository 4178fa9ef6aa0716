pub mod cli;
pub mod config;
pub mod core;
pub mod group;
pub mod inventory;
pub mod logging;
pub mod resolve;
pub mod snapshot;
pub mod vars;
pub mod vault;

pub use config::{load_config, LoadedConfig};
pub use inventory::{load, load_with_format, InventoryFormat};
pub use invload_common::{
    error::{Error, ErrorKind},
    value::{VarMap, VarValue},
};
pub use snapshot::{ConfigSnapshot, Group, GroupRecord, Host, HostRecord, VarEntry};
