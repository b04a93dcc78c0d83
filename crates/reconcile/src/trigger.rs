//! Event source wiring: schedule rules, topic subscriptions and bucket
//! notifications.

use crate::context::DeployContext;
use crate::permission::PermissionBinder;
use crate::policy::{self, Operation, Warning};
use crate::types::TopicSource;
use controlplane::{
    BucketNotification, FunctionNotification, OBJECT_CREATED_EVENT, Principal, RuleTarget,
};
use std::collections::BTreeMap;

/// Stable rule target id for a unit.
pub fn target_id(unit: &str) -> String {
    blake3::hash(unit.as_bytes()).to_hex()[..32].to_string()
}

/// Whether a notification entry targets the unit with ARN `function_arn`,
/// directly or through a qualifier.
fn targets_function(entry: &FunctionNotification, function_arn: &str) -> bool {
    entry.function_arn == function_arn
        || entry
            .function_arn
            .strip_prefix(function_arn)
            .is_some_and(|rest| rest.starts_with(':'))
}

/// One unit's subscription to object-created events of a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketBinding {
    pub unit: String,
    pub bucket: String,
    pub prefix: Option<String>,
    /// Unqualified ARN of the unit
    pub function_arn: String,
    /// ARN the notification invokes (alias ARN when aliased)
    pub target_arn: String,
}

impl BucketBinding {
    fn notification(&self) -> FunctionNotification {
        FunctionNotification {
            function_arn: self.target_arn.clone(),
            events: vec![OBJECT_CREATED_EVENT.to_string()],
            prefix: self.prefix.clone(),
        }
    }
}

/// Merge bindings for one bucket into its current configuration.
///
/// Entries targeting a bound unit or any of the `owners` (unqualified unit
/// ARNs) are dropped; entries for other units are kept. New entries follow
/// in binding order. With no bindings this prunes the owners' entries.
pub fn merge_notification(
    existing: BucketNotification,
    bindings: &[&BucketBinding],
    owners: &[String],
) -> BucketNotification {
    let mut function_configurations: Vec<FunctionNotification> = existing
        .function_configurations
        .into_iter()
        .filter(|entry| {
            !bindings
                .iter()
                .any(|b| targets_function(entry, &b.function_arn))
                && !owners.iter().any(|arn| targets_function(entry, arn))
        })
        .collect();
    function_configurations.extend(bindings.iter().map(|b| b.notification()));
    BucketNotification {
        function_configurations,
    }
}

/// Wires event sources to a unit's invoke ARN.
///
/// All wiring is advisory; failures become warnings.
pub struct TriggerBinder<'a> {
    ctx: DeployContext<'a>,
    permissions: PermissionBinder<'a>,
}

impl<'a> TriggerBinder<'a> {
    pub fn new(ctx: DeployContext<'a>) -> Self {
        Self {
            ctx,
            permissions: PermissionBinder::new(ctx),
        }
    }

    /// Create or replace the rule named after `unit`, target it at
    /// `target_arn`, and let the scheduler invoke the unit from that rule only.
    ///
    /// Returns the rule ARN.
    pub fn bind_schedule(
        &self,
        unit: &str,
        expression: &str,
        target_arn: &str,
        warnings: &mut Vec<Warning>,
    ) -> Option<String> {
        let result = self.ctx.call(|p| p.put_rule(unit, expression));
        let rule_arn = policy::absorb(Operation::PutRule, unit, result, warnings).ok()??;
        log::info!("Schedule rule {unit}: {expression}");

        let targets = [RuleTarget {
            id: target_id(unit),
            arn: target_arn.to_string(),
        }];
        let result = self.ctx.call(|p| p.put_targets(unit, &targets));
        policy::absorb(Operation::PutTargets, unit, result, warnings).ok();

        self.permissions
            .grant(unit, Principal::Scheduler, Some(&rule_arn), warnings);
        Some(rule_arn)
    }

    /// Grant the topic principal and subscribe `target_arn` to the topic.
    ///
    /// Returns the subscription ARN when a topic name is declared.
    pub fn bind_topic(
        &self,
        unit: &str,
        topic: &TopicSource,
        target_arn: &str,
        warnings: &mut Vec<Warning>,
    ) -> Option<String> {
        let Some(name) = &topic.name else {
            self.permissions.grant(unit, Principal::Topic, None, warnings);
            return None;
        };

        let result = self.ctx.call(|p| p.topic_arn(name));
        let topic_arn = policy::absorb(Operation::ResolveTopic, name, result, warnings).ok()??;
        self.permissions
            .grant(unit, Principal::Topic, Some(&topic_arn), warnings);

        let result = self.ctx.call(|p| p.subscribe(&topic_arn, target_arn));
        let subscription = policy::absorb(Operation::Subscribe, unit, result, warnings).ok()??;
        log::info!("Subscribed {unit} to {name}");
        Some(subscription)
    }

    /// Apply bucket notifications, one merged configuration per bucket.
    ///
    /// `owners` are the unqualified ARNs of every unit whose triggers were
    /// wired this run. Buckets that still hold entries for an owner but are
    /// no longer bound by it get those entries removed. Returns the number
    /// of buckets written.
    pub fn bind_buckets(
        &self,
        bindings: &[BucketBinding],
        owners: &[String],
        warnings: &mut Vec<Warning>,
    ) -> usize {
        let mut by_bucket: BTreeMap<String, Vec<&BucketBinding>> = BTreeMap::new();
        for binding in bindings {
            by_bucket.entry(binding.bucket.clone()).or_default().push(binding);
        }

        if !owners.is_empty() {
            let result = self.ctx.call(|p| p.list_buckets());
            if let Ok(Some(buckets)) =
                policy::absorb(Operation::ListBuckets, "account", result, warnings)
            {
                for bucket in buckets {
                    by_bucket.entry(bucket).or_default();
                }
            }
        }

        let mut configured = 0;
        for (bucket, bindings) in &by_bucket {
            let bucket = bucket.as_str();
            let result = self.ctx.call(|p| p.get_bucket_notification(bucket));
            // Without the current configuration a put could drop other entries
            let Ok(Some(existing)) =
                policy::absorb(Operation::GetBucketNotification, bucket, result, warnings)
            else {
                continue;
            };

            let merged = merge_notification(existing.clone(), bindings, owners);
            if bindings.is_empty() && merged == existing {
                continue;
            }

            let result = self.ctx.call(|p| p.put_bucket_notification(bucket, &merged));
            if let Ok(Some(())) =
                policy::absorb(Operation::PutBucketNotification, bucket, result, warnings)
            {
                if bindings.is_empty() {
                    log::info!("Bucket {bucket}: removed stale notification entries");
                } else {
                    log::info!(
                        "Bucket {bucket}: {} notification entries",
                        merged.function_configurations.len()
                    );
                }
                configured += 1;
            }
        }
        configured
    }
}
