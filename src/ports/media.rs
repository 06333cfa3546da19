use async_trait::async_trait;
use std::ffi::OsString;
use tokio::sync::mpsc::UnboundedSender;

/// Captured result of an external media tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last lines of stderr, enough to explain an ffmpeg failure without flooding logs.
    pub fn stderr_tail(&self) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(10);
        lines[start..].join("\n")
    }
}

/// Runs `ffmpeg`/`ffprobe`. Swapped out in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaCommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[OsString]) -> std::io::Result<CommandOutput>;

    /// Like [`MediaCommandRunner::run`], also sending each stdout line to `lines`.
    ///
    /// The default forwards the captured stdout once the process has exited;
    /// runners that can read the pipe live should override it.
    async fn run_streaming(
        &self,
        program: &str,
        args: &[OsString],
        lines: UnboundedSender<String>,
    ) -> std::io::Result<CommandOutput> {
        let output = self.run(program, args).await?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if lines.send(line.to_string()).is_err() {
                break;
            }
        }
        Ok(output)
    }
}
