//! [`RepositoryService`] and [`TokenService`] backed by the `aws ecr` CLI.
//!
//! Every call runs `aws ecr <operation> --region <region> --output json`
//! as a child process. Provider exceptions are recognised by name in
//! stderr and mapped onto [`RegistryError`] variants so callers can branch on
//! [`ErrorKind`](crate::ErrorKind).

use std::process::Stdio;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::AwsCliConfig;
use crate::error::{ErrorKind, RegistryError, Result};
use crate::service::{Repository, RepositoryService, TokenService};

#[derive(Debug, Deserialize)]
struct DescribeRepositoriesOutput {
    #[serde(default)]
    repositories: Vec<Repository>,
}

#[derive(Debug, Deserialize)]
struct CreateRepositoryOutput {
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct DescribeImagesOutput {
    #[serde(rename = "imageDetails", default)]
    image_details: Vec<ImageDetail>,
}

#[derive(Debug, Deserialize)]
struct ImageDetail {
    #[serde(rename = "imageDigest")]
    digest: String,
}

#[derive(Debug, Deserialize)]
struct AuthorizationOutput {
    #[serde(rename = "authorizationData", default)]
    data: Vec<AuthorizationData>,
}

#[derive(Debug, Deserialize)]
struct AuthorizationData {
    #[serde(rename = "authorizationToken")]
    token: String,
}

/// Registry client that shells out to the provider CLI.
#[derive(Debug, Clone)]
pub struct AwsCli {
    config: AwsCliConfig,
}

impl AwsCli {
    /// Creates a client.
    #[must_use]
    pub const fn new(config: AwsCliConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &AwsCliConfig {
        &self.config
    }

    fn command(&self, operation: &str, region: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.arg("ecr")
            .arg(operation)
            .args(["--region", region, "--output", "json"])
            .args(args)
            .env("AWS_PAGER", "")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(keys) = &self.config.keys {
            cmd.env("AWS_ACCESS_KEY_ID", &keys.access_key_id)
                .env("AWS_SECRET_ACCESS_KEY", &keys.secret_access_key);
        }
        cmd
    }

    async fn run(
        &self,
        operation: &str,
        region: &str,
        repository: &str,
        args: &[&str],
    ) -> Result<Vec<u8>> {
        let mut cmd = self.command(operation, region, args);
        debug!(operation, region, repository, "Invoking provider CLI");

        let output = tokio::time::timeout(self.config.timeout, cmd.output())
            .await
            .map_err(|_| RegistryError::Timeout {
                operation: operation.to_string(),
                seconds: self.config.timeout.as_secs(),
            })?
            .map_err(|source| RegistryError::CommandSpawn {
                program: self.config.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_failure(
                operation,
                repository,
                output.status.code(),
                stderr.trim(),
            ))
        }
    }

    fn parse<T: DeserializeOwned>(operation: &str, stdout: &[u8]) -> Result<T> {
        serde_json::from_slice(stdout).map_err(|e| RegistryError::InvalidResponse {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }
}

/// Maps a failed CLI invocation onto a [`RegistryError`].
pub(crate) fn classify_failure(
    operation: &str,
    repository: &str,
    code: Option<i32>,
    stderr: &str,
) -> RegistryError {
    const NOT_FOUND: &[&str] = &["RepositoryNotFoundException", "ImageNotFoundException"];
    const TRANSIENT: &[&str] = &[
        "ThrottlingException",
        "TooManyRequestsException",
        "ServiceUnavailable",
        "ServerException",
        "RequestTimeout",
        "ExpiredToken",
        "Could not connect to the endpoint URL",
        "Connection was closed",
        "Read timeout",
    ];
    const DENIED: &[&str] = &[
        "AccessDenied",
        "UnrecognizedClientException",
        "InvalidSignatureException",
        "Unable to locate credentials",
    ];

    let message = stderr.to_string();
    if NOT_FOUND.iter().any(|n| stderr.contains(n)) {
        RegistryError::NotFound {
            operation: operation.to_string(),
            repository: repository.to_string(),
        }
    } else if stderr.contains("RepositoryAlreadyExistsException") {
        RegistryError::AlreadyExists {
            repository: repository.to_string(),
        }
    } else if TRANSIENT.iter().any(|n| stderr.contains(n)) {
        RegistryError::Transient {
            operation: operation.to_string(),
            message,
        }
    } else if DENIED.iter().any(|n| stderr.contains(n)) {
        RegistryError::AccessDenied {
            operation: operation.to_string(),
            message,
        }
    } else {
        RegistryError::CommandFailed {
            operation: operation.to_string(),
            code,
            message,
        }
    }
}

#[async_trait]
impl RepositoryService for AwsCli {
    #[instrument(skip(self), level = "debug")]
    async fn describe_repository(&self, name: &str) -> Result<Option<Repository>> {
        const OP: &str = "describe-repositories";
        let stdout = match self
            .run(OP, &self.config.region, name, &["--repository-names", name])
            .await
        {
            Ok(stdout) => stdout,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let output: DescribeRepositoriesOutput = Self::parse(OP, &stdout)?;
        Ok(output.repositories.into_iter().find(|r| r.name == name))
    }

    #[instrument(skip(self), level = "debug")]
    async fn create_repository(&self, name: &str) -> Result<Repository> {
        const OP: &str = "create-repository";
        let stdout = self
            .run(OP, &self.config.region, name, &["--repository-name", name])
            .await?;
        let output: CreateRepositoryOutput = Self::parse(OP, &stdout)?;
        Ok(output.repository)
    }

    #[instrument(skip(self, policy_text), level = "debug")]
    async fn set_repository_policy(&self, name: &str, policy_text: &str) -> Result<()> {
        self.run(
            "set-repository-policy",
            &self.config.region,
            name,
            &["--repository-name", name, "--policy-text", policy_text],
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_repository(&self, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["--repository-name", name];
        if force {
            args.push("--force");
        }
        self.run("delete-repository", &self.config.region, name, &args)
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), level = "debug")]
    async fn image_digest(&self, name: &str, tag: &str) -> Result<Option<String>> {
        const OP: &str = "describe-images";
        let image_id = format!("imageTag={tag}");
        let stdout = match self
            .run(
                OP,
                &self.config.region,
                name,
                &["--repository-name", name, "--image-ids", &image_id],
            )
            .await
        {
            Ok(stdout) => stdout,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let output: DescribeImagesOutput = Self::parse(OP, &stdout)?;
        Ok(output.image_details.into_iter().next().map(|d| d.digest))
    }
}

#[async_trait]
impl TokenService for AwsCli {
    #[instrument(skip(self), level = "debug")]
    async fn authorization_token(&self, region: &str, account: Option<&str>) -> Result<String> {
        const OP: &str = "get-authorization-token";
        let mut args = Vec::new();
        if let Some(account) = account {
            args.extend(["--registry-ids", account]);
        }
        let stdout = self.run(OP, region, "", &args).await?;
        let output: AuthorizationOutput = Self::parse(OP, &stdout)?;
        output
            .data
            .into_iter()
            .next()
            .map(|d| d.token)
            .ok_or_else(|| RegistryError::InvalidToken {
                message: format!("no authorization data returned for region {region}"),
            })
    }
}
