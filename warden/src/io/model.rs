//! Model-completion collaborator.
//!
//! `complete(context, prompt, tier) -> text | TransportError`. Calls are
//! blocking and always carry a timeout; a timeout is a transport failure.

use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::fault::TransportError;
use crate::core::types::Tier;
use crate::io::config::ModelConfig;
use crate::io::process::run_command_with_timeout;

/// One stateless completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub tier: Tier,
    /// Short label of what the call is for (`plan`, `patch`).
    pub context: &'a str,
    pub prompt: &'a str,
    pub timeout: Duration,
}

pub trait ModelClient {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, TransportError>;
}

/// Runs one configured command per tier: prompt on stdin, completion on stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    config: ModelConfig,
}

impl CommandModel {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl ModelClient for CommandModel {
    #[instrument(skip_all, fields(tier = %request.tier, context = request.context))]
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, TransportError> {
        let argv = self.config.command_for(request.tier);
        let Some((program, args)) = argv.split_first() else {
            return Err(TransportError::failed(request.tier, "no completion command configured"));
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("WARDEN_TIER", request.tier.as_str())
            .env("WARDEN_CONTEXT", request.context);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes().to_vec()),
            request.timeout,
            self.config.output_limit_bytes,
        )
        .map_err(|err| TransportError::failed(request.tier, format!("{err:#}")))?;

        if output.timed_out {
            return Err(TransportError::timeout(request.tier, request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "completion command failed");
            return Err(TransportError::failed(
                request.tier,
                format!("exit status {}: {}", output.status, output.stderr_tail(400)),
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(TransportError::failed(
                request.tier,
                format!("completion exceeded {} bytes", self.config.output_limit_bytes),
            ));
        }
        let text = String::from_utf8(output.stdout)
            .map_err(|_| TransportError::failed(request.tier, "completion is not valid UTF-8"))?;
        if text.trim().is_empty() {
            return Err(TransportError::failed(request.tier, "empty completion"));
        }
        debug!(bytes = text.len(), "completion received");
        Ok(text)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn model(fast: &str) -> CommandModel {
        CommandModel::new(ModelConfig {
            fast_command: vec!["sh".to_string(), "-c".to_string(), fast.to_string()],
            strong_command: vec!["sh".to_string(), "-c".to_string(), "exit 9".to_string()],
            output_limit_bytes: 64,
            ..ModelConfig::default()
        })
    }

    fn request(tier: Tier, timeout: Duration) -> CompletionRequest<'static> {
        CompletionRequest {
            tier,
            context: "patch",
            prompt: "say hi",
            timeout,
        }
    }

    #[test]
    fn returns_stdout_of_tier_command() {
        let text = model("cat; echo \" from $WARDEN_TIER\"")
            .complete(&request(Tier::Fast, Duration::from_secs(10)))
            .expect("complete");
        assert_eq!(text.trim(), "say hi from fast");
    }

    #[test]
    fn nonzero_exit_is_transport_failure() {
        let err = model("cat")
            .complete(&request(Tier::Strong, Duration::from_secs(10)))
            .unwrap_err();
        assert_eq!(err.tier, Tier::Strong);
        assert!(!err.timed_out);
    }

    #[test]
    fn timeout_is_transport_failure() {
        let err = model("sleep 5")
            .complete(&request(Tier::Fast, Duration::from_millis(200)))
            .unwrap_err();
        assert!(err.timed_out);
    }

    #[test]
    fn oversized_completion_is_rejected() {
        let err = model("head -c 200 /dev/zero | tr '\\0' a")
            .complete(&request(Tier::Fast, Duration::from_secs(10)))
            .unwrap_err();
        assert!(err.reason.contains("exceeded"));
    }
}
