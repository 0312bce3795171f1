//! Status aggregation for ApiServerSource
//!
//! A pass produces at most one verdict per stage. [`fold`] lays those
//! verdicts over the previously persisted status: the three sub-conditions
//! are overwritten in place by type, `Ready` is derived from them, and the
//! sink URI, advertised event types and observed generation follow.
//!
//! Nothing here performs I/O.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::crd::{ApiServerSourceStatus, Condition, ConditionStatus, ResourceSelector};

/// Condition type names
pub mod condition_types {
    /// The sink resolved to an absolute URI
    pub const SINK_RESOLVED: &str = "SinkResolved";
    /// The service account may get, list and watch every selected resource
    pub const PERMISSIONS_GRANTED: &str = "PermissionsGranted";
    /// The receive adapter Deployment reports itself available
    pub const WORKLOAD_READY: &str = "WorkloadReady";
    /// Logical AND of the three above
    pub const READY: &str = "Ready";
}

/// Condition reasons set by the controller
pub mod reasons {
    /// A condition that has not been evaluated yet
    pub const INITIALIZING: &str = "Initializing";
    /// Sink resolved
    pub const SINK_RESOLVED: &str = "SinkResolved";
    /// All access reviews allowed
    pub const PERMISSIONS_GRANTED: &str = "PermissionsGranted";
    /// At least one access review denied
    pub const NO_SUFFICIENT_PERMISSIONS: &str = "NoSufficientPermissions";
    /// Deployment reports Available=True
    pub const DEPLOYMENT_AVAILABLE: &str = "DeploymentAvailable";
    /// Deployment has not reported availability
    pub const DEPLOYMENT_UNAVAILABLE: &str = "DeploymentUnavailable";
    /// Deployment created in this pass
    pub const DEPLOYMENT_CREATED: &str = "DeploymentCreated";
    /// Deployment replaced in this pass
    pub const DEPLOYMENT_UPDATED: &str = "DeploymentUpdated";
    /// Creating or replacing the Deployment failed
    pub const DEPLOYMENT_FAILED: &str = "DeploymentFailed";
    /// Every sub-condition is True
    pub const READY: &str = "Ready";
}

use condition_types::{PERMISSIONS_GRANTED, READY, SINK_RESOLVED, WORKLOAD_READY};

/// Prefix of every advertised event type
pub const EVENT_TYPE_PREFIX: &str = "dev.tributary.apiserver";

/// One stage's tri-state outcome
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    /// True, False or Unknown
    pub status: ConditionStatus,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

impl Verdict {
    /// A satisfied stage
    pub fn ok(reason: impl Into<String>) -> Self {
        Self::new(ConditionStatus::True, reason, "")
    }

    /// A stage that evaluated to a negative result
    pub fn failed(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ConditionStatus::False, reason, message)
    }

    /// A stage whose outcome cannot be told yet
    pub fn unknown(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ConditionStatus::Unknown, reason, message)
    }

    fn new(status: ConditionStatus, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Whether the stage succeeded
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// What one pass learned. `None` means the stage produced no verdict this pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassResults {
    /// Sink Resolver verdict
    pub sink: Option<Verdict>,
    /// Resolved URI, set together with a True sink verdict
    pub sink_uri: Option<String>,
    /// Authorization Checker verdict
    pub permissions: Option<Verdict>,
    /// Workload Reconciler verdict
    pub workload: Option<Verdict>,
}

/// The fixed set of sub-conditions plus the derived Ready
struct SourceConditions {
    sink: Condition,
    permissions: Condition,
    workload: Condition,
    ready: Condition,
}

impl SourceConditions {
    fn from_status(status: &ApiServerSourceStatus, now: DateTime<Utc>) -> Self {
        let current = |type_: &str| {
            status.condition(type_).cloned().unwrap_or_else(|| {
                Condition::at(type_, ConditionStatus::Unknown, reasons::INITIALIZING, "", now)
            })
        };
        Self {
            sink: current(SINK_RESOLVED),
            permissions: current(PERMISSIONS_GRANTED),
            workload: current(WORKLOAD_READY),
            ready: current(READY),
        }
    }

    fn apply(&mut self, results: &PassResults, now: DateTime<Utc>) {
        if let Some(v) = &results.sink {
            transition(&mut self.sink, v, now);
        }
        if let Some(v) = &results.permissions {
            transition(&mut self.permissions, v, now);
        }
        if let Some(v) = &results.workload {
            transition(&mut self.workload, v, now);
        }
        let ready = derive_ready([&self.sink, &self.permissions, &self.workload]);
        transition(&mut self.ready, &ready, now);
    }

    fn into_list(self) -> [Condition; 4] {
        [self.sink, self.permissions, self.workload, self.ready]
    }
}

/// Overwrite a condition, keeping its transition time if the status is unchanged
fn transition(condition: &mut Condition, verdict: &Verdict, now: DateTime<Utc>) {
    if condition.status != verdict.status {
        condition.last_transition_time = now;
    }
    condition.status = verdict.status;
    condition.reason.clone_from(&verdict.reason);
    condition.message.clone_from(&verdict.message);
}

/// Ready: False if any sub-condition is False, else Unknown if any is Unknown,
/// else True. Reason and message come from the first offending
/// sub-condition in priority order sink, permissions, workload.
///
/// The order only picks among conditions of the same status: a False
/// anywhere outranks an Unknown earlier in the order.
fn derive_ready(subs: [&Condition; 3]) -> Verdict {
    let first = |status: ConditionStatus| subs.iter().find(|c| c.status == status);
    if let Some(c) = first(ConditionStatus::False) {
        return Verdict::failed(c.reason.clone(), c.message.clone());
    }
    if let Some(c) = first(ConditionStatus::Unknown) {
        return Verdict::unknown(c.reason.clone(), c.message.clone());
    }
    Verdict::ok(reasons::READY)
}

/// Fold one pass's verdicts into the next status.
///
/// `previous` is the status the pass started from. Conditions of types this
/// controller does not own are carried over untouched.
pub fn fold(
    previous: Option<&ApiServerSourceStatus>,
    resources: &[ResourceSelector],
    generation: Option<i64>,
    results: &PassResults,
    now: DateTime<Utc>,
) -> ApiServerSourceStatus {
    let previous = previous.cloned().unwrap_or_default();

    let mut conditions = SourceConditions::from_status(&previous, now);
    conditions.apply(results, now);

    let mut list = previous.conditions.clone();
    for condition in conditions.into_list() {
        match list.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => list.push(condition),
        }
    }

    let sink_uri = match &results.sink {
        Some(v) if v.is_true() => results.sink_uri.clone(),
        Some(_) => None,
        None => previous.sink_uri.clone(),
    };

    let sink_ok = results.sink.as_ref().map(Verdict::is_true);
    let permissions_ok = results.permissions.as_ref().map(Verdict::is_true);
    let event_types = match (sink_ok, permissions_ok) {
        (Some(true), Some(true)) => event_types(resources),
        (Some(false), _) | (_, Some(false)) => Vec::new(),
        _ => previous.event_types.clone(),
    };

    ApiServerSourceStatus {
        observed_generation: generation,
        conditions: list,
        sink_uri,
        event_types,
    }
}

/// Event type identifier for one selector
pub fn event_type(selector: &ResourceSelector) -> String {
    let kind = selector.kind.to_lowercase();
    let group = selector.group();
    let version = selector.version();
    if group.is_empty() {
        format!("{EVENT_TYPE_PREFIX}.{kind}.{version}")
    } else {
        format!("{EVENT_TYPE_PREFIX}.{kind}.{group}.{version}")
    }
}

/// Advertised event types: one per distinct selector, sorted
pub fn event_types(resources: &[ResourceSelector]) -> Vec<String> {
    resources
        .iter()
        .map(event_type)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn namespaces() -> Vec<ResourceSelector> {
        vec![ResourceSelector::new("v1", "Namespace")]
    }

    fn all_true() -> PassResults {
        PassResults {
            sink: Some(Verdict::ok(reasons::SINK_RESOLVED)),
            sink_uri: Some("http://sink.ns.svc/".to_string()),
            permissions: Some(Verdict::ok(reasons::PERMISSIONS_GRANTED)),
            workload: Some(Verdict::ok(reasons::DEPLOYMENT_AVAILABLE)),
        }
    }

    fn status_of(status: &ApiServerSourceStatus, type_: &str) -> ConditionStatus {
        status.condition_status(type_)
    }

    /// Story: a first pass with nothing evaluated initializes every condition
    #[test]
    fn story_first_pass_initializes_conditions() {
        let status = fold(None, &namespaces(), Some(1), &PassResults::default(), t0());

        assert_eq!(status.conditions.len(), 4);
        for type_ in [SINK_RESOLVED, PERMISSIONS_GRANTED, WORKLOAD_READY, READY] {
            let c = status.condition(type_).expect("condition present");
            assert_eq!(c.status, ConditionStatus::Unknown);
            assert_eq!(c.reason, reasons::INITIALIZING);
        }
        assert_eq!(status.observed_generation, Some(1));
        assert!(status.event_types.is_empty());
        assert_eq!(status.sink_uri, None);
    }

    /// Story: Ready is True exactly when all three sub-conditions are True
    #[test]
    fn story_ready_when_everything_is_true() {
        let status = fold(None, &namespaces(), Some(2), &all_true(), t0());
        assert!(status.is_ready());
        assert_eq!(status.sink_uri.as_deref(), Some("http://sink.ns.svc/"));
        assert_eq!(
            status.event_types,
            vec!["dev.tributary.apiserver.namespace.v1".to_string()]
        );
    }

    /// Story: the surfaced message follows sink > permissions > workload
    #[test]
    fn story_ready_message_priority() {
        let mut results = PassResults {
            sink: Some(Verdict::failed("SinkNotFound", "sink missing")),
            sink_uri: None,
            permissions: Some(Verdict::failed(
                reasons::NO_SUFFICIENT_PERMISSIONS,
                "denied",
            )),
            workload: Some(Verdict::failed(reasons::DEPLOYMENT_FAILED, "boom")),
        };
        let status = fold(None, &namespaces(), Some(1), &results, t0());
        let ready = status.condition(READY).expect("ready present");
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.message, "sink missing");
        assert_eq!(ready.reason, "SinkNotFound");

        results.sink = Some(Verdict::ok(reasons::SINK_RESOLVED));
        let status = fold(None, &namespaces(), Some(1), &results, t0());
        assert_eq!(status.condition(READY).expect("ready").message, "denied");

        results.permissions = Some(Verdict::ok(reasons::PERMISSIONS_GRANTED));
        let status = fold(None, &namespaces(), Some(1), &results, t0());
        assert_eq!(status.condition(READY).expect("ready").message, "boom");
    }

    #[test]
    fn false_outranks_unknown_regardless_of_priority() {
        let results = PassResults {
            sink: Some(Verdict::ok(reasons::SINK_RESOLVED)),
            sink_uri: Some("http://s/".to_string()),
            permissions: None,
            workload: Some(Verdict::failed(reasons::DEPLOYMENT_FAILED, "boom")),
        };
        let status = fold(None, &namespaces(), Some(1), &results, t0());
        let ready = status.condition(READY).expect("ready present");
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.message, "boom");
    }

    /// Story: a just-created workload keeps Ready Unknown but advertises event types
    #[test]
    fn story_event_types_do_not_wait_for_workload() {
        let mut results = all_true();
        results.workload = Some(Verdict::unknown(
            reasons::DEPLOYMENT_UNAVAILABLE,
            "waiting",
        ));
        let status = fold(None, &namespaces(), Some(1), &results, t0());
        assert_eq!(status_of(&status, READY), ConditionStatus::Unknown);
        assert_eq!(status.event_types.len(), 1);
    }

    #[test]
    fn event_types_cleared_when_permissions_denied() {
        let previous = fold(None, &namespaces(), Some(1), &all_true(), t0());
        let results = PassResults {
            sink: Some(Verdict::ok(reasons::SINK_RESOLVED)),
            sink_uri: Some("http://sink.ns.svc/".to_string()),
            permissions: Some(Verdict::failed(
                reasons::NO_SUFFICIENT_PERMISSIONS,
                "denied",
            )),
            workload: None,
        };
        let status = fold(Some(&previous), &namespaces(), Some(2), &results, t0());
        assert!(status.event_types.is_empty());
        // Workload was not evaluated: previous verdict persists
        assert_eq!(status_of(&status, WORKLOAD_READY), ConditionStatus::True);
        assert_eq!(status_of(&status, READY), ConditionStatus::False);
    }

    /// Story: stages that produced no verdict leave the previous one in place
    #[test]
    fn story_absent_verdicts_keep_previous_values() {
        let previous = fold(None, &namespaces(), Some(1), &all_true(), t0());
        let status = fold(
            Some(&previous),
            &namespaces(),
            Some(2),
            &PassResults::default(),
            t0() + Duration::minutes(5),
        );
        assert!(status.is_ready());
        assert_eq!(status.sink_uri, previous.sink_uri);
        assert_eq!(status.event_types, previous.event_types);
        assert_eq!(status.observed_generation, Some(2));
    }

    #[test]
    fn sink_failure_clears_uri() {
        let previous = fold(None, &namespaces(), Some(1), &all_true(), t0());
        let results = PassResults {
            sink: Some(Verdict::failed("SinkNotReady", "no address")),
            ..Default::default()
        };
        let status = fold(Some(&previous), &namespaces(), Some(1), &results, t0());
        assert_eq!(status.sink_uri, None);
        assert!(status.event_types.is_empty());
    }

    /// Story: folding the same results twice yields an identical status
    #[test]
    fn story_fold_is_stable_across_passes() {
        let first = fold(None, &namespaces(), Some(1), &all_true(), t0());
        let second = fold(
            Some(&first),
            &namespaces(),
            Some(1),
            &all_true(),
            t0() + Duration::minutes(10),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn transition_time_moves_only_on_status_change() {
        let later = t0() + Duration::minutes(1);
        let first = fold(None, &namespaces(), Some(1), &all_true(), t0());

        let mut results = all_true();
        results.workload = Some(Verdict::ok("SomeOtherReason"));
        let same_status = fold(Some(&first), &namespaces(), Some(1), &results, later);
        let c = same_status.condition(WORKLOAD_READY).expect("present");
        assert_eq!(c.last_transition_time, t0());
        assert_eq!(c.reason, "SomeOtherReason");

        results.workload = Some(Verdict::failed(reasons::DEPLOYMENT_FAILED, "boom"));
        let flipped = fold(Some(&first), &namespaces(), Some(1), &results, later);
        let c = flipped.condition(WORKLOAD_READY).expect("present");
        assert_eq!(c.last_transition_time, later);
    }

    #[test]
    fn foreign_conditions_are_never_dropped() {
        let mut previous = ApiServerSourceStatus::default();
        previous.conditions.push(Condition::at(
            "Audited",
            ConditionStatus::True,
            "ByHand",
            "",
            t0(),
        ));
        let status = fold(Some(&previous), &namespaces(), Some(1), &all_true(), t0());
        assert_eq!(status.conditions.len(), 5);
        assert_eq!(status.conditions[0].type_, "Audited");
    }

    #[test]
    fn event_types_are_distinct_and_sorted() {
        let mut labelled = ResourceSelector::new("v1", "Namespace");
        labelled.match_labels.insert("team".into(), "a".into());
        let resources = vec![
            ResourceSelector::new("apps/v1", "Deployment"),
            ResourceSelector::new("v1", "Namespace"),
            labelled,
        ];
        assert_eq!(
            event_types(&resources),
            vec![
                "dev.tributary.apiserver.deployment.apps.v1".to_string(),
                "dev.tributary.apiserver.namespace.v1".to_string(),
            ]
        );
    }
}
