//! # Template Steps
//!
//! Wire types for `spec.template`. Steps run in declared order; each step
//! consumes the previous step's output.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One entry of `spec.template`; exactly one step kind must be set
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ytt: Option<YttTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kbld: Option<KbldTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_template: Option<HelmTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kustomize: Option<KustomizeTemplate>,
}

/// `ytt` over fetched paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct YttTemplate {
    /// Paths relative to the content root; the whole root when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    /// Data values passed with `--data-value-yaml key=value`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline_values: Vec<TemplateValue>,
    /// Files (relative to the content root) passed with `--data-values-file`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_files: Vec<String>,
    #[serde(default)]
    pub ignore_unknown_comments: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct TemplateValue {
    pub name: String,
    pub value: String,
}

/// `kbld` image reference resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KbldTemplate {
    /// Paths to process instead of the previous step's output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

/// `helm template` of a chart directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmTemplate {
    /// Release name; defaults to the App name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Release namespace; defaults to the App namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Chart directory relative to the content root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_files: Vec<String>,
    /// Values passed with `--set`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline_values: Vec<TemplateValue>,
}

/// `kustomize build` of a directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct KustomizeTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Validated template step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateStep {
    Ytt(YttTemplate),
    Kbld(KbldTemplate),
    HelmTemplate(HelmTemplate),
    Kustomize(KustomizeTemplate),
}

impl TemplateStep {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            TemplateStep::Ytt(_) => "ytt",
            TemplateStep::Kbld(_) => "kbld",
            TemplateStep::HelmTemplate(_) => "helmTemplate",
            TemplateStep::Kustomize(_) => "kustomize",
        }
    }
}

/// Template entry with zero or several step kinds set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("template[{index}] must set exactly one of ytt, kbld, helmTemplate, kustomize (found {found})")]
pub struct StepConfigError {
    pub index: usize,
    pub found: usize,
}

impl AppTemplate {
    /// Convert the wire entry at `index` into a [`TemplateStep`]
    pub fn to_step(&self, index: usize) -> Result<TemplateStep, StepConfigError> {
        let mut steps = Vec::with_capacity(1);
        if let Some(ytt) = &self.ytt {
            steps.push(TemplateStep::Ytt(ytt.clone()));
        }
        if let Some(kbld) = &self.kbld {
            steps.push(TemplateStep::Kbld(kbld.clone()));
        }
        if let Some(helm) = &self.helm_template {
            steps.push(TemplateStep::HelmTemplate(helm.clone()));
        }
        if let Some(kustomize) = &self.kustomize {
            steps.push(TemplateStep::Kustomize(kustomize.clone()));
        }
        match steps.len() {
            1 => Ok(steps.remove(0)),
            found => Err(StepConfigError { index, found }),
        }
    }
}
