//! Success/failure hooks.
//!
//! Hooks are arbitrary `sh -c` command lines taken from the config file, which
//! is trusted. A hook that fails is logged and otherwise ignored: it must never
//! hide the outcome it was reporting.

use anyhow::{Context, Result, bail};
use std::process::Command;
use tracing::{debug, warn};

use crate::config::NotifyConfig;

const MESSAGE_PLACEHOLDER: &str = "{message}";

/// Run `command` through `sh -c`.
fn sh(command: &str, args: &[&str]) -> Result<()> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .arg("mtbackup")
        .args(args)
        .status()
        .with_context(|| format!("failed to spawn sh for `{}`", command))?;
    if !status.success() {
        bail!("`{}` exited with {}", command, status);
    }
    Ok(())
}

/// Expand a failure-message template.
///
/// The message itself never becomes part of the command text; it is passed
/// as `$1`. `{message}` in the template marks where it goes, otherwise it is
/// appended as the last argument. Quotes written around the placeholder are
/// dropped, since `"$1"` is already a single word.
fn message_command(template: &str) -> String {
    if template.contains(MESSAGE_PLACEHOLDER) {
        template
            .replace("'{message}'", "\"$1\"")
            .replace("\"{message}\"", "\"$1\"")
            .replace(MESSAGE_PLACEHOLDER, "\"$1\"")
    } else {
        format!("{} \"$1\"", template)
    }
}

/// Run a hook, logging instead of propagating any failure.
pub fn run_hook(command: &str) {
    debug!(%command, "running hook");
    if let Err(e) = sh(command, &[]) {
        warn!("failure to exec notify: {:#}", e);
    }
}

/// Run a failure-message hook with `message` as its argument.
pub fn run_message_hook(template: &str, message: &str) {
    let command = message_command(template);
    debug!(%command, "running message hook");
    if let Err(e) = sh(&command, &[message]) {
        warn!("failure to exec notify: {:#}", e);
    }
}

/// Applies the `[notify]` section of the config.
pub struct Notifier<'a> {
    cfg: &'a NotifyConfig,
}

impl<'a> Notifier<'a> {
    pub fn new(cfg: &'a NotifyConfig) -> Self {
        Notifier { cfg }
    }

    pub fn success(&self) {
        if let Some(cmd) = self.cfg.on_success.as_deref() {
            run_hook(cmd);
        }
    }

    /// Run the failure hook, then the failure-message hook with `message`.
    pub fn failure(&self, message: &str) {
        if let Some(cmd) = self.cfg.on_failure.as_deref() {
            run_hook(cmd);
        }
        if let Some(template) = self.cfg.on_failure_msg.as_deref() {
            run_message_hook(template, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn message_is_appended_or_substituted() {
        assert_eq!(message_command("logger -t bak"), "logger -t bak \"$1\"");
        assert_eq!(
            message_command("printf '%s\\n' {message} >> log"),
            "printf '%s\\n' \"$1\" >> log"
        );
    }

    #[test]
    fn quoted_placeholder_still_expands() {
        assert_eq!(message_command("logger '{message}'"), "logger \"$1\"");
        assert_eq!(message_command("logger \"{message}\""), "logger \"$1\"");

        let td = tempdir().unwrap();
        let out = td.path().join("msg");
        let template = format!("printf '%s' '{{message}}' > '{}'", out.display());
        run_message_hook(&template, "Error run export: exit status 1");
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "Error run export: exit status 1"
        );
    }

    #[test]
    fn message_is_not_interpreted_by_the_shell() {
        let td = tempdir().unwrap();
        let out = td.path().join("msg");
        let template = format!("printf '%s' {{message}} > '{}'", out.display());
        run_message_hook(&template, "Error x: $(touch pwned); `id`");
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "Error x: $(touch pwned); `id`"
        );
        assert!(!td.path().join("pwned").exists());
    }

    #[test]
    fn appended_message_is_a_single_argument() {
        let td = tempdir().unwrap();
        let out = td.path().join("args");
        let template = format!("sh -c 'echo $# > \"{}\"' hook", out.display());
        run_message_hook(&template, "two words");
        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "1");
    }

    #[test]
    fn failing_hook_does_not_panic() {
        run_hook("exit 3");
        run_hook("definitely-not-a-command-mtbackup");
    }

    #[test]
    fn notifier_runs_hooks_in_order() {
        let td = tempdir().unwrap();
        let log = td.path().join("log");
        let cfg = NotifyConfig {
            on_success: Some(format!("echo success >> '{}'", log.display())),
            on_failure: Some(format!("echo failure >> '{}'", log.display())),
            on_failure_msg: Some(format!("echo >> '{}'", log.display())),
        };
        let n = Notifier::new(&cfg);
        n.failure("boom");
        assert_eq!(fs::read_to_string(&log).unwrap(), "failure\nboom\n");
        n.success();
        assert_eq!(
            fs::read_to_string(&log).unwrap(),
            "failure\nboom\nsuccess\n"
        );
    }

    #[test]
    fn unset_hooks_do_nothing() {
        let cfg = NotifyConfig::default();
        let n = Notifier::new(&cfg);
        n.success();
        n.failure("ignored");
    }
}
