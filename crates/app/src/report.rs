//! Results returned by the command router.

use std::collections::BTreeMap;

use serde::Serialize;

use synhome_domain::device::AppliedResult;
use synhome_domain::error::{CommandError, SynHomeError};

use crate::ports::Ack;

/// What happened to the adapter side of an applied command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The device is virtual.
    Local,
    /// The device is bound but nothing changed, so nothing was sent.
    Unchanged,
    Sent(Ack),
    /// Sending failed; the local change is kept.
    Failed(CommandError),
}

/// One device's applied change and its dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOutcome {
    pub applied: AppliedResult,
    pub dispatch: Dispatch,
}

/// Outcome of a command that may address several devices.
#[derive(Debug, Default)]
pub struct RouteReport {
    pub outcomes: Vec<DeviceOutcome>,
    /// Devices left alone because they lack a referenced capability.
    pub skipped: Vec<String>,
    pub failures: Vec<(String, SynHomeError)>,
}

impl RouteReport {
    #[must_use]
    pub fn single(outcome: DeviceOutcome) -> Self {
        Self {
            outcomes: vec![outcome],
            ..Self::default()
        }
    }

    /// Changed capability names per device, omitting devices without
    /// changes.
    #[must_use]
    pub fn changed_capabilities(&self) -> BTreeMap<String, Vec<String>> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.applied.changes.is_empty())
            .map(|outcome| {
                (
                    outcome.applied.device_id.clone(),
                    outcome.applied.changed_capabilities(),
                )
            })
            .collect()
    }

    /// Devices whose change stayed local because dispatch failed.
    pub fn dispatch_failures(&self) -> impl Iterator<Item = (&str, &CommandError)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.dispatch {
            Dispatch::Failed(err) => Some((outcome.applied.device_id.as_str(), err)),
            _ => None,
        })
    }
}

/// One scene step's result.
#[derive(Debug)]
pub struct StepReport {
    pub index: usize,
    pub device_id: String,
    pub result: Result<RouteReport, SynHomeError>,
}

/// Outcome of running a scene; every step is attempted.
#[derive(Debug)]
pub struct SceneReport {
    pub scene_id: String,
    pub steps: Vec<StepReport>,
}

impl SceneReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|step| {
            step.result
                .as_ref()
                .is_ok_and(|report| report.failures.is_empty())
        })
    }
}

/// Outward reply to a command submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_capabilities: Option<BTreeMap<String, Vec<String>>>,
}

impl CommandOutcome {
    /// Summarise a route report.
    ///
    /// Succeeds when at least one device accepted the command and none
    /// rejected it. Dispatch failures are listed in the message but do not
    /// fail the outcome, since the local change stands.
    #[must_use]
    pub fn from_report(report: &RouteReport) -> Self {
        let mut parts = Vec::new();
        if report.outcomes.is_empty() {
            parts.push("no device accepted the command".to_string());
        } else {
            parts.push(format!("applied to {} device(s)", report.outcomes.len()));
        }
        if !report.skipped.is_empty() {
            parts.push(format!("skipped {}", report.skipped.join(", ")));
        }
        for (device_id, err) in report.dispatch_failures() {
            parts.push(format!("{device_id} not reached: {err}"));
        }
        for (device_id, err) in &report.failures {
            parts.push(format!("{device_id} failed: {err}"));
        }

        let changed = report.changed_capabilities();
        Self {
            success: !report.outcomes.is_empty() && report.failures.is_empty(),
            message: parts.join("; "),
            changed_capabilities: (!changed.is_empty()).then_some(changed),
        }
    }

    #[must_use]
    pub fn failure(err: &SynHomeError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            changed_capabilities: None,
        }
    }
}
