//! Building the message content from files and standard input.

use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;

/// Formats each file as a fenced block headed by its path.
pub fn embed_files(paths: &[PathBuf]) -> io::Result<String> {
    let mut blocks = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs::read_to_string(path)?;
        blocks.push(format!("{}:\n```\n{content}\n```\n", path.display()));
    }
    Ok(blocks.join("\n"))
}

/// Reads a single line, or every line until end of input in multiline mode.
pub fn read_prompt<R: BufRead>(reader: R, multiline: bool) -> io::Result<String> {
    let mut lines = Vec::new();
    for line in reader.lines() {
        lines.push(line?);
        if !multiline {
            break;
        }
    }
    Ok(lines.join("\n"))
}
