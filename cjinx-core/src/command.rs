use std::ffi::OsStr;
use std::process::Command;
use tracing::debug;

/// Result of one external tool invocation, stdout and stderr merged.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub status: Option<i32>,
    pub text: String,
}

/// Run `program args..` to completion. There is no timeout: a hung tool hangs
/// the caller.
pub fn run<I, S>(program: &str, args: I) -> std::io::Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    debug!(command = ?cmd, "spawn");
    let out = cmd.output()?;
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&out.stderr));
    debug!(status = ?out.status.code(), output = %text.trim_end(), "{program} finished");
    Ok(CommandOutput { success: out.status.success(), status: out.status.code(), text })
}

/// Like [`run`] but folds spawn errors and non-zero exits into one message.
pub fn run_checked<I, S>(program: &str, args: I) -> Result<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    match run(program, args) {
        Ok(out) if out.success => Ok(out.text),
        Ok(out) => Err(format!(
            "{program} exited with {}: {}",
            out.status.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()),
            out.text.trim()
        )),
        Err(e) => Err(format!("{program}: {e}")),
    }
}
