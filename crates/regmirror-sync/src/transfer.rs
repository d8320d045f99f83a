//! External transfer tools.
//!
//! Images move with `skopeo`, charts with `helm`. Both run as child
//! processes whose output is streamed to `debug` line by line. The exit code
//! and the tail of the output are the only feedback.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use regmirror_registry::{sha256_hex, Credential};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransferError;

/// Lines of tool output kept for error messages.
const OUTPUT_TAIL: usize = 20;

/// One source → destination copy.
#[derive(Debug, Clone, Copy)]
pub struct CopyRequest<'a> {
    /// Source reference without transport prefix.
    pub source: &'a str,
    /// Destination reference without transport prefix.
    pub destination: &'a str,
    /// Pull credentials; `None` pulls anonymously.
    pub source_credentials: Option<&'a Credential>,
    /// Push credentials.
    pub destination_credentials: &'a Credential,
}

/// Moves images between registries.
#[async_trait]
pub trait ImageTransfer: Send + Sync {
    /// Copies one tag, all architectures.
    async fn copy(
        &self,
        request: &CopyRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError>;

    /// Copies every tag of a repository into `request.destination`, which
    /// names the destination parent path.
    async fn sync_repository(
        &self,
        request: &CopyRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError>;

    /// Digest of the source manifest as `sha256:<hex>`.
    async fn source_digest(
        &self,
        source: &str,
        credentials: Option<&Credential>,
    ) -> Result<String, TransferError>;
}

/// Pushes chart archives to an OCI registry.
#[async_trait]
pub trait ChartTransfer: Send + Sync {
    /// Logs the tool in to `registry`.
    async fn login(&self, registry: &str, credentials: &Credential) -> Result<(), TransferError>;

    /// Pushes `archive` to `target` (an `oci://` URL).
    async fn push(
        &self,
        archive: &Path,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError>;
}

#[derive(Debug)]
struct OutputTail(VecDeque<String>);

impl OutputTail {
    fn new() -> Self {
        Self(VecDeque::with_capacity(OUTPUT_TAIL))
    }

    fn push(&mut self, line: String) {
        if self.0.len() == OUTPUT_TAIL {
            self.0.pop_front();
        }
        self.0.push_back(line);
    }

    fn joined(&self) -> String {
        self.0.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

fn not_captured(program: &str, stream: &str) -> TransferError {
    TransferError::Spawn {
        program: program.to_string(),
        source: std::io::Error::other(format!("{stream} not captured")),
    }
}

/// Runs `program`, streaming output, until it exits or `cancel` fires.
async fn run_tool(
    program: &str,
    args: &[String],
    stdin: Option<&str>,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let spawn_err = |source| TransferError::Spawn {
        program: program.to_string(),
        source,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_err)?;

    if let Some(data) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| not_captured(program, "stdin"))?;
        pipe.write_all(data.as_bytes()).await.map_err(spawn_err)?;
        pipe.shutdown().await.map_err(spawn_err)?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| not_captured(program, "stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| not_captured(program, "stderr"))?;
    let mut out = BufReader::new(stdout).lines();
    let mut err = BufReader::new(stderr).lines();
    let mut out_open = true;
    let mut err_open = true;
    let mut tail = OutputTail::new();

    let status = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(TransferError::Cancelled { program: program.to_string() });
            }
            line = out.next_line(), if out_open => match line {
                Ok(Some(line)) => {
                    debug!(tool = program, "{line}");
                    tail.push(line);
                }
                _ => out_open = false,
            },
            line = err.next_line(), if err_open => match line {
                Ok(Some(line)) => {
                    debug!(tool = program, "{line}");
                    tail.push(line);
                }
                _ => err_open = false,
            },
            status = child.wait(), if !out_open && !err_open => break status.map_err(spawn_err)?,
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(TransferError::Failed {
            program: program.to_string(),
            code: status.code(),
            output: tail.joined(),
        })
    }
}

/// [`ImageTransfer`] backed by `skopeo`.
#[derive(Debug, Clone)]
pub struct Skopeo {
    program: String,
}

impl Default for Skopeo {
    fn default() -> Self {
        Self::new()
    }
}

impl Skopeo {
    /// Uses `skopeo` from `PATH`.
    pub fn new() -> Self {
        Self {
            program: "skopeo".to_string(),
        }
    }

    /// Overrides the program path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn credential_args(request: &CopyRequest<'_>) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        match request.source_credentials {
            Some(cred) => args.extend(["--src-creds".to_string(), cred.as_flag()]),
            None => args.push("--src-no-creds".to_string()),
        }
        args.extend([
            "--dest-creds".to_string(),
            request.destination_credentials.as_flag(),
        ]);
        args
    }

    /// Arguments for a single-tag copy.
    pub fn copy_args(request: &CopyRequest<'_>) -> Vec<String> {
        let mut args = vec!["copy".to_string(), "--all".to_string()];
        args.extend(Self::credential_args(request));
        args.push(format!("docker://{}", request.source));
        args.push(format!("docker://{}", request.destination));
        args
    }

    /// Arguments for a whole-repository sync.
    pub fn sync_args(request: &CopyRequest<'_>) -> Vec<String> {
        let mut args: Vec<String> = [
            "sync",
            "--src",
            "docker",
            "--dest",
            "docker",
            "--all",
            "--keep-going",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        args.extend(Self::credential_args(request));
        args.push(request.source.to_string());
        args.push(request.destination.to_string());
        args
    }
}

#[async_trait]
impl ImageTransfer for Skopeo {
    async fn copy(
        &self,
        request: &CopyRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        run_tool(&self.program, &Self::copy_args(request), None, cancel).await
    }

    async fn sync_repository(
        &self,
        request: &CopyRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        run_tool(&self.program, &Self::sync_args(request), None, cancel).await
    }

    async fn source_digest(
        &self,
        source: &str,
        credentials: Option<&Credential>,
    ) -> Result<String, TransferError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["inspect", "--raw"]);
        match credentials {
            Some(cred) => cmd.arg("--creds").arg(cred.as_flag()),
            None => cmd.arg("--no-creds"),
        };
        let output = cmd
            .arg(format!("docker://{source}"))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransferError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(format!("sha256:{}", sha256_hex(&output.stdout)))
        } else {
            Err(TransferError::Failed {
                program: self.program.clone(),
                code: output.status.code(),
                output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// [`ChartTransfer`] backed by `helm`.
#[derive(Debug, Clone)]
pub struct HelmCli {
    program: String,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new()
    }
}

impl HelmCli {
    /// Uses `helm` from `PATH`.
    pub fn new() -> Self {
        Self {
            program: "helm".to_string(),
        }
    }

    /// Overrides the program path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl ChartTransfer for HelmCli {
    async fn login(&self, registry: &str, credentials: &Credential) -> Result<(), TransferError> {
        let args = [
            "registry",
            "login",
            registry,
            "--username",
            credentials.username(),
            "--password-stdin",
        ]
        .map(str::to_string);
        run_tool(
            &self.program,
            &args,
            Some(credentials.password()),
            &CancellationToken::new(),
        )
        .await
    }

    async fn push(
        &self,
        archive: &Path,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let args = [
            "push".to_string(),
            archive.display().to_string(),
            target.to_string(),
        ];
        run_tool(&self.program, &args, None, cancel).await
    }
}
