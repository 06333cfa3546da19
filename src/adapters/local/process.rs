use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

use crate::ports::media::{CommandOutput, MediaCommandRunner};

/// Runs media tools as child processes.
///
/// Children are killed when the returned future is dropped, so abandoning an
/// encoding fan-out stops every sibling ffmpeg.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaCommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[OsString]) -> io::Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn run_streaming(
        &self,
        program: &str,
        args: &[OsString],
        lines: UnboundedSender<String>,
    ) -> io::Result<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr was not captured"))?;

        let forward = async {
            let mut captured = Vec::new();
            let mut reader = BufReader::new(stdout).lines();
            while let Some(line) = reader.next_line().await? {
                captured.extend_from_slice(line.as_bytes());
                captured.push(b'\n');
                // a dropped receiver only means nobody is watching
                let _ = lines.send(line);
            }
            Ok::<_, io::Error>(captured)
        };
        let drain = async {
            let mut captured = Vec::new();
            stderr.read_to_end(&mut captured).await?;
            Ok::<_, io::Error>(captured)
        };

        // both pipes must be drained before waiting or a chatty child blocks
        let (stdout, stderr) = tokio::try_join!(forward, drain)?;
        let status = child.wait().await?;

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}
