use anyhow::{Context, Result};

use crate::engine::process::{CommandLine, ProcessRunner};

/// First line of `<tool> -version`, e.g. "ffmpeg version 6.1.1 ..."
pub fn tool_version(runner: &dyn ProcessRunner, tool: &str) -> Result<String> {
    let mut cmd = CommandLine::new(tool);
    cmd.arg("-version");

    let output = runner
        .run(&cmd)
        .with_context(|| format!("Failed to execute {}. Is it installed and in PATH?", tool))?;

    if !output.success() {
        anyhow::bail!("{} -version failed ({})", tool, output.describe_status());
    }

    Ok(output
        .stdout
        .lines()
        .next()
        .unwrap_or("Unknown version")
        .to_string())
}

pub fn ffmpeg_version(runner: &dyn ProcessRunner) -> Result<String> {
    tool_version(runner, "ffmpeg")
}

pub fn ffprobe_version(runner: &dyn ProcessRunner) -> Result<String> {
    tool_version(runner, "ffprobe")
}

/// Encoders compiled into the local ffmpeg, from `ffmpeg -hide_banner -encoders`
pub fn available_encoders(runner: &dyn ProcessRunner) -> Result<Vec<String>> {
    let mut cmd = CommandLine::new("ffmpeg");
    cmd.args(["-hide_banner", "-encoders"]);

    let output = runner.run(&cmd).context("Failed to execute ffmpeg")?;
    if !output.success() {
        anyhow::bail!("ffmpeg -encoders failed ({})", output.describe_status());
    }

    Ok(parse_encoder_list(&output.stdout))
}

/// Lines look like ` V....D libx265              libx265 H.265 / HEVC`
pub fn parse_encoder_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let flags = fields.next()?;
            let name = fields.next()?;
            (flags.len() == 6).then(|| name.to_string())
        })
        .collect()
}
