use std::io::{self, Write};
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::debug;

#[cfg(target_os = "macos")]
const CLIPBOARD_COMMANDS: &[(&str, &[&str])] = &[("pbcopy", &[])];

#[cfg(target_os = "windows")]
const CLIPBOARD_COMMANDS: &[(&str, &[&str])] = &[("cmd", &["/C", "clip"])];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const CLIPBOARD_COMMANDS: &[(&str, &[&str])] = &[
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
];

/// Copies `text` with the first clipboard command that succeeds.
pub fn copy_to_clipboard(text: &str) -> Result<(), String> {
    for (program, args) in CLIPBOARD_COMMANDS {
        match pipe_into(program, args, text) {
            Ok(()) => return Ok(()),
            Err(err) => debug!(program, error = %err, "Clipboard command failed"),
        }
    }

    let names: Vec<&str> = CLIPBOARD_COMMANDS.iter().map(|(program, _)| *program).collect();
    Err(format!(
        "No working clipboard command found (tried {})",
        names.join(", ")
    ))
}

fn pipe_into(program: &str, args: &[&str], input: &str) -> io::Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let status = write_and_wait(&mut child, input)?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("{program} exited with {status}")))
    }
}

/// Feeds `input` to the child and reaps it, even when the write fails.
fn write_and_wait(child: &mut Child, input: &str) -> io::Result<ExitStatus> {
    let written = match child.stdin.take() {
        Some(mut stdin) => stdin.write_all(input.as_bytes()),
        None => Ok(()),
    };
    let status = child.wait()?;
    written.map(|()| status)
}
