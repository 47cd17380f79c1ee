// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Lifecycle translation for providers with native rule sets

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use crate::errors::{CirruxError, Result};

use super::{LifecycleAction, LifecyclePolicy};

/// Neutral lifecycle rule: the common denominator of S3, GCS and Azure
/// rule documents. Providers translate to and from this form; the
/// engine never touches provider wire formats directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeRule {
    /// Absent on providers whose rules have no stable identity (GCS).
    pub id: Option<String>,
    pub prefix: String,
    pub days: u32,
    pub action: NativeAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeAction {
    /// Provider expiration / delete.
    Expire,
    /// Provider tier transition (GLACIER / ARCHIVE / TierToArchive).
    Transition,
}

/// Retention converted to whole days, rounded up, minimum 1.
pub fn retention_days(retention: Duration) -> u32 {
    let days = retention.as_secs().div_ceil(86400);
    days.max(1).min(u32::MAX as u64) as u32
}

impl NativeRule {
    pub fn from_policy(policy: &LifecyclePolicy) -> Self {
        NativeRule {
            id: Some(policy.id.clone()),
            prefix: policy.prefix.clone(),
            days: retention_days(policy.retention),
            action: match policy.action {
                LifecycleAction::Delete => NativeAction::Expire,
                LifecycleAction::Archive { .. } => NativeAction::Transition,
            },
        }
    }
}

/// Whole-document access to a provider's lifecycle rule set. Provider
/// SDK wrappers implement this; the engine always replaces the full set
/// so the provider applies updates atomically.
#[async_trait]
pub trait RuleDocumentStore: Send + Sync {
    async fn fetch(&self) -> Result<Vec<NativeRule>>;
    async fn replace(&self, rules: Vec<NativeRule>) -> Result<()>;

    /// Drop the lifecycle configuration wholesale. Defaults to writing
    /// an empty set.
    async fn delete_configuration(&self) -> Result<()> {
        self.replace(Vec::new()).await
    }

    /// GCS rules carry no stable ids; removal there is a documented
    /// no-op and read-back synthesizes positional ids.
    fn supports_rule_ids(&self) -> bool {
        true
    }
}

/// Lifecycle engine for rule-bearing providers: fetch, edit, write back.
pub struct NativeLifecycle<S: RuleDocumentStore> {
    store: S,
}

impl<S: RuleDocumentStore> NativeLifecycle<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn add_policy(&self, policy: &LifecyclePolicy) -> Result<()> {
        policy.validate()?;
        let rule = NativeRule::from_policy(policy);
        let mut rules = self.store.fetch().await?;
        rules.retain(|r| r.id.as_deref() != Some(policy.id.as_str()));
        rules.push(rule);
        self.store.replace(rules).await
    }

    pub async fn remove_policy(&self, id: &str) -> Result<()> {
        if !self.store.supports_rule_ids() {
            warn!(policy = %id, "provider rules have no stable ids; remove_policy is a no-op");
            return Ok(());
        }
        let rules = self.store.fetch().await?;
        let filtered: Vec<NativeRule> = rules
            .iter()
            .filter(|r| r.id.as_deref() != Some(id))
            .cloned()
            .collect();
        if filtered.len() == rules.len() {
            return Err(CirruxError::PolicyNotFound { id: id.to_string() });
        }
        if filtered.is_empty() {
            self.store.delete_configuration().await
        } else {
            self.store.replace(filtered).await
        }
    }

    pub async fn get_rules(&self) -> Result<Vec<NativeRule>> {
        let mut rules = self.store.fetch().await?;
        if !self.store.supports_rule_ids() {
            for (n, rule) in rules.iter_mut().enumerate() {
                rule.id = Some(format!("rule-{}", n));
            }
        }
        Ok(rules)
    }
}

// --- Provider rule documents -------------------------------------------
//
// Serde models for the three rule-bearing providers, translating to and
// from the neutral form. The SDK wrappers ship these documents as-is.

/// S3 / MinIO lifecycle configuration.
pub mod s3 {
    use super::*;

    pub const TRANSITION_STORAGE_CLASS: &str = "GLACIER";

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct LifecycleConfiguration {
        pub rules: Vec<Rule>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Rule {
        #[serde(rename = "ID")]
        pub id: String,
        pub status: String,
        pub prefix: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub expiration: Option<Expiration>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub transition: Option<Transition>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Expiration {
        pub days: u32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Transition {
        pub days: u32,
        pub storage_class: String,
    }

    pub fn to_document(rules: &[NativeRule]) -> LifecycleConfiguration {
        LifecycleConfiguration {
            rules: rules
                .iter()
                .map(|r| Rule {
                    id: r.id.clone().unwrap_or_default(),
                    status: "Enabled".to_string(),
                    prefix: r.prefix.clone(),
                    expiration: matches!(r.action, NativeAction::Expire)
                        .then(|| Expiration { days: r.days }),
                    transition: matches!(r.action, NativeAction::Transition).then(|| Transition {
                        days: r.days,
                        storage_class: TRANSITION_STORAGE_CLASS.to_string(),
                    }),
                })
                .collect(),
        }
    }

    pub fn from_document(doc: &LifecycleConfiguration) -> Vec<NativeRule> {
        doc.rules
            .iter()
            .map(|r| NativeRule {
                id: Some(r.id.clone()),
                prefix: r.prefix.clone(),
                days: r
                    .expiration
                    .as_ref()
                    .map(|e| e.days)
                    .or_else(|| r.transition.as_ref().map(|t| t.days))
                    .unwrap_or(1),
                action: if r.expiration.is_some() {
                    NativeAction::Expire
                } else {
                    NativeAction::Transition
                },
            })
            .collect()
    }
}

/// GCS lifecycle document. Rules have no ids.
pub mod gcs {
    use super::*;

    pub const TRANSITION_STORAGE_CLASS: &str = "ARCHIVE";

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Lifecycle {
        pub rule: Vec<Rule>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Rule {
        pub action: Action,
        pub condition: Condition,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Action {
        #[serde(rename = "type")]
        pub action_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub storage_class: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Condition {
        pub age: u32,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        pub matches_prefix: Vec<String>,
    }

    pub fn to_document(rules: &[NativeRule]) -> Lifecycle {
        Lifecycle {
            rule: rules
                .iter()
                .map(|r| Rule {
                    action: match r.action {
                        NativeAction::Expire => Action {
                            action_type: "Delete".to_string(),
                            storage_class: None,
                        },
                        NativeAction::Transition => Action {
                            action_type: "SetStorageClass".to_string(),
                            storage_class: Some(TRANSITION_STORAGE_CLASS.to_string()),
                        },
                    },
                    condition: Condition {
                        age: r.days,
                        matches_prefix: if r.prefix.is_empty() {
                            Vec::new()
                        } else {
                            vec![r.prefix.clone()]
                        },
                    },
                })
                .collect(),
        }
    }

    pub fn from_document(doc: &Lifecycle) -> Vec<NativeRule> {
        doc.rule
            .iter()
            .map(|r| NativeRule {
                id: None,
                prefix: r.condition.matches_prefix.first().cloned().unwrap_or_default(),
                days: r.condition.age,
                action: if r.action.action_type == "Delete" {
                    NativeAction::Expire
                } else {
                    NativeAction::Transition
                },
            })
            .collect()
    }
}

/// Azure Blob management policy.
pub mod azure {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ManagementPolicy {
        pub rules: Vec<Rule>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Rule {
        pub name: String,
        pub enabled: bool,
        #[serde(rename = "type")]
        pub rule_type: String,
        pub definition: Definition,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Definition {
        pub filters: Filters,
        pub actions: Actions,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Filters {
        pub blob_types: Vec<String>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        pub prefix_match: Vec<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Actions {
        pub base_blob: BaseBlob,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BaseBlob {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub tier_to_archive: Option<DaysAfterModification>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub delete: Option<DaysAfterModification>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DaysAfterModification {
        pub days_after_modification_greater_than: u32,
    }

    pub fn to_document(rules: &[NativeRule]) -> ManagementPolicy {
        ManagementPolicy {
            rules: rules
                .iter()
                .map(|r| {
                    let mut base_blob = BaseBlob::default();
                    let days = DaysAfterModification {
                        days_after_modification_greater_than: r.days,
                    };
                    match r.action {
                        NativeAction::Expire => base_blob.delete = Some(days),
                        NativeAction::Transition => base_blob.tier_to_archive = Some(days),
                    }
                    Rule {
                        name: r.id.clone().unwrap_or_default(),
                        enabled: true,
                        rule_type: "Lifecycle".to_string(),
                        definition: Definition {
                            filters: Filters {
                                blob_types: vec!["blockBlob".to_string()],
                                prefix_match: if r.prefix.is_empty() {
                                    Vec::new()
                                } else {
                                    vec![r.prefix.clone()]
                                },
                            },
                            actions: Actions { base_blob },
                        },
                    }
                })
                .collect(),
        }
    }

    pub fn from_document(doc: &ManagementPolicy) -> Vec<NativeRule> {
        doc.rules
            .iter()
            .map(|r| {
                let base = &r.definition.actions.base_blob;
                let (days, action) = match (&base.delete, &base.tier_to_archive) {
                    (Some(d), _) => (d.days_after_modification_greater_than, NativeAction::Expire),
                    (None, Some(t)) => (
                        t.days_after_modification_greater_than,
                        NativeAction::Transition,
                    ),
                    (None, None) => (1, NativeAction::Expire),
                };
                NativeRule {
                    id: Some(r.name.clone()),
                    prefix: r.definition.filters.prefix_match.first().cloned().unwrap_or_default(),
                    days,
                    action,
                }
            })
            .collect()
    }
}

/// In-memory rule document, standing in for a provider in tests and for
/// archive-only targets that accept rule uploads.
pub struct MemoryRuleStore {
    rules: RwLock<Vec<NativeRule>>,
    with_ids: bool,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            with_ids: true,
        }
    }

    /// A store behaving like GCS: rules lose their ids on write.
    pub fn without_ids() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            with_ids: false,
        }
    }
}

impl Default for MemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleDocumentStore for MemoryRuleStore {
    async fn fetch(&self) -> Result<Vec<NativeRule>> {
        Ok(self.rules.read().await.clone())
    }

    async fn replace(&self, mut rules: Vec<NativeRule>) -> Result<()> {
        if !self.with_ids {
            for rule in &mut rules {
                rule.id = None;
            }
        }
        *self.rules.write().await = rules;
        Ok(())
    }

    fn supports_rule_ids(&self) -> bool {
        self.with_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn policy(id: &str, action: LifecycleAction) -> LifecyclePolicy {
        LifecyclePolicy {
            id: id.to_string(),
            prefix: "logs/".to_string(),
            retention: Duration::from_secs(90 * 86400),
            action,
        }
    }

    #[test]
    fn test_retention_rounds_up_to_whole_days() {
        assert_eq!(retention_days(Duration::from_secs(1)), 1);
        assert_eq!(retention_days(Duration::from_secs(86400)), 1);
        assert_eq!(retention_days(Duration::from_secs(86401)), 2);
        assert_eq!(retention_days(Duration::from_secs(7 * 86400)), 7);
    }

    #[tokio::test]
    async fn test_add_policy_replaces_matching_rule() {
        let engine = NativeLifecycle::new(MemoryRuleStore::new());
        engine.add_policy(&policy("p1", LifecycleAction::Delete)).await.unwrap();
        engine.add_policy(&policy("p1", LifecycleAction::Delete)).await.unwrap();
        engine.add_policy(&policy("p2", LifecycleAction::Delete)).await.unwrap();
        let rules = engine.get_rules().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules.iter().filter(|r| r.id.as_deref() == Some("p1")).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_remove_policy_filters_set() {
        let engine = NativeLifecycle::new(MemoryRuleStore::new());
        engine.add_policy(&policy("p1", LifecycleAction::Delete)).await.unwrap();
        engine.add_policy(&policy("p2", LifecycleAction::Delete)).await.unwrap();
        engine.remove_policy("p1").await.unwrap();
        let rules = engine.get_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id.as_deref(), Some("p2"));

        let err = engine.remove_policy("ghost").await.unwrap_err();
        assert!(matches!(err, CirruxError::PolicyNotFound { .. }));
    }

    #[tokio::test]
    async fn test_idless_store_synthesizes_ids_and_skips_removal() {
        let engine = NativeLifecycle::new(MemoryRuleStore::without_ids());
        engine.add_policy(&policy("p1", LifecycleAction::Delete)).await.unwrap();
        engine.add_policy(&policy("p2", LifecycleAction::Delete)).await.unwrap();

        // Removal is a documented no-op on id-less providers.
        engine.remove_policy("p1").await.unwrap();
        let rules = engine.get_rules().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id.as_deref(), Some("rule-0"));
        assert_eq!(rules[1].id.as_deref(), Some("rule-1"));
    }

    #[test]
    fn test_s3_document_round_trip() {
        let rules = vec![
            NativeRule {
                id: Some("expire-logs".to_string()),
                prefix: "logs/".to_string(),
                days: 7,
                action: NativeAction::Expire,
            },
            NativeRule {
                id: Some("tier-cold".to_string()),
                prefix: "cold/".to_string(),
                days: 30,
                action: NativeAction::Transition,
            },
        ];
        let doc = s3::to_document(&rules);
        assert_eq!(doc.rules[1].transition.as_ref().unwrap().storage_class, "GLACIER");
        assert_eq!(s3::from_document(&doc), rules);
    }

    #[test]
    fn test_gcs_document_drops_ids() {
        let rules = vec![NativeRule {
            id: Some("will-vanish".to_string()),
            prefix: "logs/".to_string(),
            days: 7,
            action: NativeAction::Transition,
        }];
        let doc = gcs::to_document(&rules);
        assert_eq!(doc.rule[0].action.action_type, "SetStorageClass");
        assert_eq!(doc.rule[0].action.storage_class.as_deref(), Some("ARCHIVE"));
        let back = gcs::from_document(&doc);
        assert_eq!(back[0].id, None);
        assert_eq!(back[0].days, 7);
    }

    #[test]
    fn test_azure_document_round_trip() {
        let rules = vec![NativeRule {
            id: Some("tier".to_string()),
            prefix: "archive/".to_string(),
            days: 60,
            action: NativeAction::Transition,
        }];
        let doc = azure::to_document(&rules);
        assert!(doc.rules[0]
            .definition
            .actions
            .base_blob
            .tier_to_archive
            .is_some());
        assert_eq!(azure::from_document(&doc), rules);
    }

    #[tokio::test]
    async fn test_archive_policy_translates_to_transition() {
        let sink = Arc::new(crate::archive::MemoryArchiver::new());
        let p = policy("tier", LifecycleAction::Archive { destination: sink });
        let rule = NativeRule::from_policy(&p);
        assert_eq!(rule.action, NativeAction::Transition);
        assert_eq!(rule.days, 90);
    }
}
