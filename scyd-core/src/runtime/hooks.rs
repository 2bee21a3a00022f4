//! User-configured commands fired after a download finishes.

use std::process::Stdio;

use strum::Display;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::runtime::args::split_args;
use crate::runtime::types::{DownloadId, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HookKind {
    OnDownloadComplete,
    OnError,
}

/// What a hook process is told about the download that triggered it.
///
/// Passed as `SCYD_DOWNLOAD_ID`, `SCYD_DOWNLOAD_URL` and, when set,
/// `SCYD_ERROR_MESSAGE`.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub download_id: DownloadId,
    pub url: String,
    pub error_message: Option<String>,
}

/// Pre-split hook commands.
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    on_download_complete: Option<Vec<String>>,
    on_error: Option<Vec<String>>,
}

impl Hooks {
    /// Parse both command lines. Blank commands disable the hook.
    pub fn parse(
        on_download_complete: Option<&str>,
        on_error: Option<&str>,
    ) -> Result<Self, RuntimeError> {
        let parse = |raw: Option<&str>| -> Result<Option<Vec<String>>, RuntimeError> {
            let words = split_args(raw.unwrap_or_default())?;
            Ok((!words.is_empty()).then_some(words))
        };
        Ok(Self {
            on_download_complete: parse(on_download_complete)?,
            on_error: parse(on_error)?,
        })
    }

    pub fn command(&self, kind: HookKind) -> Option<&[String]> {
        match kind {
            HookKind::OnDownloadComplete => self.on_download_complete.as_deref(),
            HookKind::OnError => self.on_error.as_deref(),
        }
    }

    /// Start the hook in the background. Its exit status is only logged.
    ///
    /// Returns `None` when the hook is not configured.
    pub fn fire(&self, kind: HookKind, context: HookContext) -> Option<JoinHandle<()>> {
        let argv = self.command(kind)?.to_vec();
        Some(tokio::spawn(run_hook(kind, argv, context)))
    }
}

async fn run_hook(kind: HookKind, argv: Vec<String>, context: HookContext) {
    let Some((program, args)) = argv.split_first() else {
        return;
    };
    info!(hook = %kind, program = %program, download_id = context.download_id, "running hook");

    let mut command = Command::new(program);
    command
        .args(args)
        .env("SCYD_DOWNLOAD_ID", context.download_id.to_string())
        .env("SCYD_DOWNLOAD_URL", &context.url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(message) = &context.error_message {
        command.env("SCYD_ERROR_MESSAGE", message);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(hook = %kind, program = %program, error = %e, "failed to start hook");
            return;
        }
    };
    match child.wait().await {
        Ok(status) if status.success() => debug!(hook = %kind, "hook finished"),
        Ok(status) => warn!(hook = %kind, %status, "hook exited unsuccessfully"),
        Err(e) => warn!(hook = %kind, error = %e, "failed to wait for hook"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blank_hooks_are_disabled() {
        let hooks = Hooks::parse(Some("  "), None).unwrap();
        assert!(hooks.command(HookKind::OnDownloadComplete).is_none());
        assert!(hooks.command(HookKind::OnError).is_none());
    }

    #[test]
    fn malformed_hook_is_rejected() {
        assert!(Hooks::parse(Some("notify-send 'oops"), None).is_err());
    }

    #[tokio::test]
    async fn unconfigured_hook_does_not_fire() {
        let hooks = Hooks::default();
        assert!(hooks.fire(HookKind::OnError, HookContext::default()).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hook_receives_context_in_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("hook.out");
        let script = format!(
            "sh -c 'echo \"$SCYD_DOWNLOAD_ID $SCYD_ERROR_MESSAGE\" > \"{}\"'",
            out.display()
        );
        let hooks = Hooks::parse(None, Some(&script)).unwrap();

        let context = HookContext {
            download_id: 42,
            url: "https://example.com/v".into(),
            error_message: Some("boom".into()),
        };
        hooks.fire(HookKind::OnError, context).unwrap().await.unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), "42 boom");
    }

    #[tokio::test]
    async fn missing_hook_binary_is_only_logged() {
        let hooks = Hooks::parse(Some("/nonexistent/scyd-hook"), None).unwrap();
        let handle = hooks
            .fire(HookKind::OnDownloadComplete, HookContext::default())
            .unwrap();
        handle.await.unwrap();
    }
}
