//! Executable plugins exposed to the model as callable functions.
//!
//! A plugin is a pair of files in the plugin directory: `<name>.def.json`
//! holding the function definition and an executable `<name>` that receives
//! the call arguments (a JSON string) as its only argument and answers on
//! stdout.

pub mod command;
pub mod registry;

pub use command::PluginTool;
pub use registry::{default_plugin_dir, load_plugins};

pub const PLUGIN_DIR_NAME: &str = ".cli-gpt-plugins";
pub const DEFINITION_SUFFIX: &str = ".def.json";
