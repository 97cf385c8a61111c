//! Inline sources: literal files plus Secret / ConfigMap keys written as files.

use super::secrets::{config_map_entries, secret_entries, LookupError, ResourceLookup};
use super::{safe_join, FetchError};
use crate::crd::FetchInline;
use crate::exec::CmdRunResult;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub(super) async fn write_inline(
    inline: &FetchInline,
    content_dir: &Path,
    namespace: &str,
    lookup: &dyn ResourceLookup,
) -> Result<CmdRunResult, FetchError> {
    let mut written = Vec::new();

    for (path, content) in &inline.paths {
        let target = safe_join(content_dir, path)?;
        write_file(&target, content.as_bytes()).await?;
        written.push(path.clone());
    }

    for source in &inline.paths_from {
        let (entries, directory): (BTreeMap<String, Vec<u8>>, Option<&str>) =
            match (&source.secret_ref, &source.config_map_ref) {
                (Some(secret_ref), _) => {
                    let secret = lookup
                        .get_secret(namespace, &secret_ref.name)
                        .await
                        .map_err(|e| not_found("Secret", &secret_ref.name, e))?;
                    (secret_entries(&secret), secret_ref.directory_path.as_deref())
                }
                (None, Some(config_map_ref)) => {
                    let config_map = lookup
                        .get_config_map(namespace, &config_map_ref.name)
                        .await
                        .map_err(|e| not_found("ConfigMap", &config_map_ref.name, e))?;
                    (
                        config_map_entries(&config_map),
                        config_map_ref.directory_path.as_deref(),
                    )
                }
                (None, None) => continue,
            };

        let base = match directory {
            Some(dir) => safe_join(content_dir, dir)?,
            None => content_dir.to_path_buf(),
        };
        for (key, value) in entries {
            let target = safe_join(&base, &key)?;
            write_file(&target, &value).await?;
            written.push(target.strip_prefix(content_dir).map_or_else(
                |_| key.clone(),
                |p| p.display().to_string(),
            ));
        }
    }

    debug!(files = written.len(), "inline content written");
    Ok(CmdRunResult::success(written.join("\n")))
}

fn not_found(kind: &'static str, name: &str, error: LookupError) -> FetchError {
    match error {
        LookupError::NotFound { .. } => FetchError::InlineSourceNotFound {
            kind,
            name: name.to_string(),
        },
        other => FetchError::Lookup(other),
    }
}

async fn write_file(target: &Path, content: &[u8]) -> Result<(), FetchError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::io(format!("failed to create {}", parent.display()), e))?;
    }
    tokio::fs::write(target, content)
        .await
        .map_err(|e| FetchError::io(format!("failed to write {}", target.display()), e))
}
