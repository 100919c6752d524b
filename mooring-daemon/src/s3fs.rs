//! Mount primitive backed by the `s3fs` FUSE driver.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use mooring_sync::error::mount_io_err;
use mooring_sync::{classify_mount_failure, MountError, MountOptions, MountPrimitive};

pub const DEFAULT_MOUNT_TIMEOUT: Duration = Duration::from_secs(30);

const ENV_ACCESS_KEY: &str = "AWSACCESSKEYID";
const ENV_SECRET_KEY: &str = "AWSSECRETACCESSKEY";

pub struct S3fsMount {
    program: String,
    timeout: Duration,
}

impl Default for S3fsMount {
    fn default() -> Self {
        Self::new()
    }
}

impl S3fsMount {
    pub fn new() -> Self {
        Self {
            program: "s3fs".to_string(),
            timeout: DEFAULT_MOUNT_TIMEOUT,
        }
    }

    /// Run a different executable (tests, or a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Arguments after the program name. Credentials never appear here.
pub fn mount_args(bucket: &str, path: &Path, endpoint: &str) -> Vec<String> {
    vec![
        bucket.to_string(),
        path.display().to_string(),
        "-o".to_string(),
        format!("url={endpoint}"),
        "-o".to_string(),
        "use_path_request_style".to_string(),
        "-o".to_string(),
        "nonempty".to_string(),
    ]
}

#[async_trait]
impl MountPrimitive for S3fsMount {
    async fn mount(
        &self,
        bucket: &str,
        path: &Path,
        options: MountOptions<'_>,
    ) -> Result<(), MountError> {
        let mut command = Command::new(&self.program);
        command
            .args(mount_args(bucket, path, options.endpoint))
            .env(ENV_ACCESS_KEY, &options.credentials.access_key_id)
            .env(ENV_SECRET_KEY, &options.credentials.secret_access_key)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(bucket, path = %path.display(), endpoint = options.endpoint, "mounting bucket");
        // Creating the directory stats a possibly hung FUSE path, so it
        // shares the mount's deadline.
        let attempt = async {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| mount_io_err(path, e))?;
            command.output().await.map_err(|err| {
                MountError::Failed(format!("could not run {}: {err}", self.program))
            })
        };
        let output = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(MountError::Failed(format!(
                    "{} did not finish within {:?}",
                    self.program, self.timeout
                )))
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = match (stderr.trim(), stdout.trim()) {
            ("", "") => format!("{} exited with {}", self.program, output.status),
            ("", out) => out.to_string(),
            (err, _) => err.to_string(),
        };
        Err(classify_mount_failure(&message))
    }
}
