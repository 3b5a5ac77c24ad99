//! Shell command helpers shared by the local backend and the command hosts.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u128,
}

impl CommandOutput {
    /// stdout followed by stderr, as a single log.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }
}

/// Run `cmd` through `sh -c`, optionally feeding `stdin`.
pub fn run_shell(cmd: &str, cwd: &Path, stdin: Option<&str>) -> io::Result<CommandOutput> {
    let started = Instant::now();

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(cwd)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(input) = stdin {
        let Some(mut pipe) = child.stdin.take() else {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "failed to open stdin for child process",
            ));
        };
        pipe.write_all(input.as_bytes())?;
        pipe.flush()?;
    }

    let out = child.wait_with_output()?;

    Ok(CommandOutput {
        success: out.status.success(),
        exit_code: out.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&out.stdout).to_string(),
        stderr: String::from_utf8_lossy(&out.stderr).to_string(),
        duration_ms: started.elapsed().as_millis(),
    })
}

/// Replace `{key}` placeholders with their values.
pub fn expand_template(template: &str, vars: &[(&str, &str)]) -> String {
    let map: HashMap<&str, &str> = vars.iter().copied().collect();

    let mut out = template.to_string();
    for (k, v) in map {
        out = out.replace(&format!("{{{k}}}"), v);
    }
    out
}

/// Single-quote a value for safe interpolation into a `sh -c` line.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
