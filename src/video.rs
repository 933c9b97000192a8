use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};

pub const URL_PLACEHOLDER: &str = "%URL%";

/// Program and arguments for the configured player. The URL replaces every
/// `%URL%` token, or is appended when the command has none.
pub fn player_args(command: &[String], url: &str) -> Result<(String, Vec<String>)> {
    let (program, rest) = command
        .split_first()
        .filter(|(program, _)| !program.trim().is_empty())
        .ok_or_else(|| anyhow!("video player command not configured"))?;
    if url.trim().is_empty() {
        return Err(anyhow!("video playback url missing"));
    }

    let mut substituted = false;
    let mut args: Vec<String> = rest
        .iter()
        .map(|arg| {
            if arg.contains(URL_PLACEHOLDER) {
                substituted = true;
                arg.replace(URL_PLACEHOLDER, url)
            } else {
                arg.clone()
            }
        })
        .collect();
    if !substituted {
        args.push(url.to_string());
    }
    Ok((program.clone(), args))
}

pub fn spawn_external_player(command: &[String], url: &str) -> Result<()> {
    let (program, args) = player_args(command, url)?;
    log::info!("launching {program} for {url}");
    Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("launch {program} to play {url}"))?;
    Ok(())
}
