use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use tracing::{debug, warn};

use crate::core::tools::{ToolDefinition, ToolTable};
use crate::plugins::{PluginTool, DEFINITION_SUFFIX, PLUGIN_DIR_NAME};

/// `~/.cli-gpt-plugins`, or `None` when the home directory is unknown.
pub fn default_plugin_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(PLUGIN_DIR_NAME))
}

/// Collects every plugin in `dir` whose executable is present.
///
/// A missing directory yields an empty table. Definitions without a matching
/// executable, with an unreadable body, or naming a different function than
/// their file are skipped.
pub fn load_plugins(dir: &Path) -> io::Result<ToolTable> {
    let mut table = ToolTable::new();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "No plugin directory");
            return Ok(table);
        }
        Err(err) => return Err(err),
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|file_name| {
            file_name
                .strip_suffix(DEFINITION_SUFFIX)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        })
        .collect();
    names.sort();

    for name in names {
        let program = dir.join(&name);
        if !is_executable(&program) {
            debug!(plugin = %name, "Skipping plugin without an executable");
            continue;
        }

        let definition_path = dir.join(format!("{name}{DEFINITION_SUFFIX}"));
        let definition = match read_definition(&definition_path) {
            Ok(definition) => definition,
            Err(err) => {
                warn!(plugin = %name, error = %err, "Skipping plugin with invalid definition");
                continue;
            }
        };
        if definition.name != name {
            warn!(
                plugin = %name,
                declared = %definition.name,
                "Skipping plugin whose definition names another function"
            );
            continue;
        }

        debug!(plugin = %name, "Loaded plugin");
        table.register(definition, Box::new(PluginTool::new(name, program)));
    }

    Ok(table)
}

fn read_definition(path: &Path) -> Result<ToolDefinition, Box<dyn std::error::Error>> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o100 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
