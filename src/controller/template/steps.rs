//! Command construction for each template step kind.

use super::{StepInput, TemplateContext, TemplateError};
use crate::config::ToolPaths;
use crate::controller::fetch::safe_join;
use crate::crd::{HelmTemplate, KbldTemplate, KustomizeTemplate, TemplateStep, YttTemplate};
use crate::exec::CommandSpec;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// stderr fragments that mark a kbld failure as network / registry flakiness
static TRANSIENT_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(i/o timeout|timed out|connection refused|connection reset|no such host|TLS handshake|temporary failure|too many requests|status code 429|status code 5\d\d|\b50[234]\b)",
    )
    .expect("Failed to compile transient marker regex")
});

/// Whether a failed step should be retried on the backoff schedule
pub(super) fn is_retryable(step: &TemplateStep, stderr: &str) -> bool {
    matches!(step, TemplateStep::Kbld(_)) && TRANSIENT_MARKERS.is_match(stderr)
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn resolve(content_dir: &Path, relative: &str) -> Result<PathBuf, TemplateError> {
    safe_join(content_dir, relative).map_err(|_| TemplateError::UnsafePath(relative.to_string()))
}

/// Build the command for one step
///
/// `dir` is the directory a directory-consuming step reads from: the fetched
/// content for the first step, the previous output written to a scratch
/// directory otherwise.
pub(super) fn command(
    step: &TemplateStep,
    input: &StepInput,
    dir: &Path,
    content_dir: &Path,
    ctx: &TemplateContext,
    tools: &ToolPaths,
) -> Result<CommandSpec, TemplateError> {
    match step {
        TemplateStep::Ytt(ytt) => ytt_command(ytt, input, content_dir, tools),
        TemplateStep::Kbld(kbld) => kbld_command(kbld, input, content_dir, tools),
        TemplateStep::HelmTemplate(helm) => helm_command(helm, dir, ctx, tools),
        TemplateStep::Kustomize(kustomize) => kustomize_command(kustomize, dir, tools),
    }
}

fn ytt_command(
    ytt: &YttTemplate,
    input: &StepInput,
    content_dir: &Path,
    tools: &ToolPaths,
) -> Result<CommandSpec, TemplateError> {
    let mut cmd = CommandSpec::new(&tools.ytt);
    match input {
        StepInput::Directory(dir) if ytt.paths.is_empty() => {
            cmd = cmd.arg("-f").arg(path_arg(dir));
        }
        StepInput::Directory(_) => {}
        StepInput::Stream(stream) => {
            cmd = cmd.arg("-f").arg("-").stdin(stream.as_bytes());
        }
    }
    for path in &ytt.paths {
        cmd = cmd.arg("-f").arg(path_arg(&resolve(content_dir, path)?));
    }
    for file in &ytt.values_files {
        cmd = cmd
            .arg("--data-values-file")
            .arg(path_arg(&resolve(content_dir, file)?));
    }
    for value in &ytt.inline_values {
        cmd = cmd
            .arg("--data-value-yaml")
            .arg(format!("{}={}", value.name, value.value));
    }
    if ytt.ignore_unknown_comments {
        cmd = cmd.arg("--ignore-unknown-comments");
    }
    Ok(cmd)
}

fn kbld_command(
    kbld: &KbldTemplate,
    input: &StepInput,
    content_dir: &Path,
    tools: &ToolPaths,
) -> Result<CommandSpec, TemplateError> {
    let mut cmd = CommandSpec::new(&tools.kbld);
    if kbld.paths.is_empty() {
        cmd = match input {
            StepInput::Directory(dir) => cmd.arg("-f").arg(path_arg(dir)),
            StepInput::Stream(stream) => cmd.arg("-f").arg("-").stdin(stream.as_bytes()),
        };
    }
    for path in &kbld.paths {
        cmd = cmd.arg("-f").arg(path_arg(&resolve(content_dir, path)?));
    }
    Ok(cmd)
}

fn helm_command(
    helm: &HelmTemplate,
    dir: &Path,
    ctx: &TemplateContext,
    tools: &ToolPaths,
) -> Result<CommandSpec, TemplateError> {
    let chart = match &helm.path {
        Some(path) => resolve(dir, path)?,
        None => dir.to_path_buf(),
    };
    let name = helm.name.as_deref().unwrap_or(&ctx.app_name);
    let namespace = helm.namespace.as_deref().unwrap_or(&ctx.namespace);

    let mut cmd = CommandSpec::new(&tools.helm)
        .arg("template")
        .arg(name)
        .arg(path_arg(&chart))
        .arg("--namespace")
        .arg(namespace)
        .arg("--include-crds");
    for file in &helm.values_files {
        cmd = cmd.arg("--values").arg(path_arg(&resolve(dir, file)?));
    }
    for value in &helm.inline_values {
        cmd = cmd.arg("--set").arg(format!("{}={}", value.name, value.value));
    }
    Ok(cmd)
}

fn kustomize_command(
    kustomize: &KustomizeTemplate,
    dir: &Path,
    tools: &ToolPaths,
) -> Result<CommandSpec, TemplateError> {
    let target = match &kustomize.path {
        Some(path) => resolve(dir, path)?,
        None => dir.to_path_buf(),
    };
    Ok(CommandSpec::new(&tools.kustomize)
        .arg("build")
        .arg(path_arg(&target)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::TemplateValue;

    fn ctx() -> TemplateContext {
        TemplateContext {
            app_name: "demo".to_string(),
            namespace: "apps".to_string(),
        }
    }

    #[test]
    fn test_ytt_on_directory_with_values() {
        let step = TemplateStep::Ytt(YttTemplate {
            paths: vec!["config".to_string()],
            inline_values: vec![TemplateValue {
                name: "replicas".to_string(),
                value: "3".to_string(),
            }],
            ..YttTemplate::default()
        });
        let content = Path::new("/w/root");
        let cmd = command(
            &step,
            &StepInput::Directory(content.to_path_buf()),
            content,
            content,
            &ctx(),
            &ToolPaths::default(),
        )
        .unwrap();
        assert_eq!(
            cmd.to_string(),
            "ytt -f /w/root/config --data-value-yaml replicas=3"
        );
        assert!(cmd.stdin.is_none());
    }

    #[test]
    fn test_kbld_consumes_stream_on_stdin() {
        let step = TemplateStep::Kbld(KbldTemplate::default());
        let content = Path::new("/w/root");
        let cmd = command(
            &step,
            &StepInput::Stream("kind: Deployment\n".to_string()),
            Path::new("/w/template-1"),
            content,
            &ctx(),
            &ToolPaths::default(),
        )
        .unwrap();
        assert_eq!(cmd.to_string(), "kbld -f -");
        assert_eq!(cmd.stdin.as_deref(), Some(b"kind: Deployment\n".as_slice()));
    }

    #[test]
    fn test_helm_defaults_release_to_app() {
        let step = TemplateStep::HelmTemplate(HelmTemplate {
            path: Some("chart".to_string()),
            ..HelmTemplate::default()
        });
        let content = Path::new("/w/root");
        let cmd = command(
            &step,
            &StepInput::Directory(content.to_path_buf()),
            content,
            content,
            &ctx(),
            &ToolPaths::default(),
        )
        .unwrap();
        assert_eq!(
            cmd.to_string(),
            "helm template demo /w/root/chart --namespace apps --include-crds"
        );
    }

    #[test]
    fn test_escaping_path_is_rejected() {
        let step = TemplateStep::Kustomize(KustomizeTemplate {
            path: Some("../../etc".to_string()),
        });
        let content = Path::new("/w/root");
        let err = command(
            &step,
            &StepInput::Directory(content.to_path_buf()),
            content,
            content,
            &ctx(),
            &ToolPaths::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::UnsafePath(_)));
    }

    #[test]
    fn test_only_kbld_network_errors_are_retryable() {
        let kbld = TemplateStep::Kbld(KbldTemplate::default());
        let ytt = TemplateStep::Ytt(YttTemplate::default());
        let stderr = "kbld: Error: resolving image: Get \"https://index.docker.io/v2/\": dial tcp: i/o timeout";
        assert!(is_retryable(&kbld, stderr));
        assert!(!is_retryable(&ytt, stderr));
        assert!(!is_retryable(&kbld, "kbld: Error: Expected to find at least one image"));
    }
}
