use crate::config::toml_config::HarvestConfig;
use crate::domain::model::{CompletenessRule, Language, LanguageContent, RawItem, SignalPatch};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// RawItem -> 分組鍵。鍵一定以 feed group 開頭，不同家族永不合併
pub trait FingerprintStrategy: Send + Sync {
    fn fingerprint(&self, item: &RawItem, feed_group: &str, mergeable: bool) -> String;
}

/// external_id 優先；否則 標題 + 主機 + 發佈日。
/// 發佈時間只是估計值時改用完整連結，避免隔天重抓產生不同的鍵。
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFingerprint;

impl FingerprintStrategy for DefaultFingerprint {
    fn fingerprint(&self, item: &RawItem, feed_group: &str, mergeable: bool) -> String {
        let mut material = String::new();
        material.push_str("group:");
        material.push_str(feed_group);
        material.push('|');
        if !mergeable {
            material.push_str("src:");
            material.push_str(&item.source_id);
            material.push('|');
        }

        if item.external_id.is_empty() {
            material.push_str("title:");
            material.push_str(&normalize_title(&item.title));
            material.push_str("|host:");
            material.push_str(&item.link_host().unwrap_or_default());
            if item.published_at_estimated {
                material.push_str("|link:");
                material.push_str(&item.link);
            } else {
                material.push_str("|day:");
                material.push_str(&item.published_at.format("%Y-%m-%d").to_string());
            }
        } else {
            material.push_str("id:");
            material.push_str(&item.external_id);
        }

        let digest = Sha256::digest(material.as_bytes());
        let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}:{}", feed_group, hex)
    }
}

/// 解碼實體、轉小寫、去標點、合併空白
pub fn normalize_title(title: &str) -> String {
    let decoded = html_escape::decode_html_entities(title).to_lowercase();
    let cleaned: String = decoded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 來源 -> feed group 以及各 group 是否可跨來源合併
#[derive(Debug, Clone, Default)]
pub struct GroupingPolicy {
    source_groups: HashMap<String, String>,
    mergeable: HashMap<String, bool>,
}

impl GroupingPolicy {
    pub fn from_config(config: &HarvestConfig) -> Self {
        let mut policy = Self::default();
        for feed in &config.feeds {
            policy.source_groups.insert(feed.id.clone(), feed.feed_group.clone());
        }
        for group in &config.feed_groups {
            policy.mergeable.insert(group.name.clone(), config.is_mergeable(&group.name));
        }
        policy
    }

    pub fn with_source(mut self, source_id: impl Into<String>, feed_group: impl Into<String>) -> Self {
        self.source_groups.insert(source_id.into(), feed_group.into());
        self
    }

    pub fn with_mergeable(mut self, feed_group: impl Into<String>, mergeable: bool) -> Self {
        self.mergeable.insert(feed_group.into(), mergeable);
        self
    }

    /// 未登記的來源自成一組
    pub fn feed_group_of<'a>(&'a self, source_id: &'a str) -> &'a str {
        self.source_groups
            .get(source_id)
            .map(String::as_str)
            .unwrap_or(source_id)
    }

    pub fn is_mergeable(&self, feed_group: &str) -> bool {
        self.mergeable.get(feed_group).copied().unwrap_or(true)
    }
}

/// 同一指紋的所有 RawItem
#[derive(Debug, Clone, PartialEq)]
pub struct SignalUpdate {
    pub key: String,
    pub feed_group: String,
    pub items: Vec<RawItem>,
}

impl SignalUpdate {
    /// 每個語言選出一個代表項目：發佈時間較新者優先，同時間則有內文者優先，其餘保留先出現者
    pub fn winners(&self) -> BTreeMap<Language, &RawItem> {
        let mut winners: BTreeMap<Language, &RawItem> = BTreeMap::new();
        for item in &self.items {
            match winners.get(&item.language) {
                None => {
                    winners.insert(item.language, item);
                }
                Some(current) => {
                    let newer = item.published_at > current.published_at;
                    let tie_with_body = item.published_at == current.published_at
                        && item.has_body()
                        && !current.has_body();
                    if newer || tie_with_body {
                        winners.insert(item.language, item);
                    }
                }
            }
        }
        winners
    }

    pub fn to_patch(&self, rule: CompletenessRule, at: DateTime<Utc>) -> SignalPatch {
        let mut patch = SignalPatch::new(&self.key, &self.feed_group, rule, at);
        for (lang, item) in self.winners() {
            patch = patch
                .with_language(
                    lang,
                    LanguageContent::listing(&item.title, &item.link, item.body.as_deref(), at),
                )
                .with_meta_url(lang, &item.link);
        }
        patch
    }
}

pub struct GroupingEngine {
    strategy: Arc<dyn FingerprintStrategy>,
    policy: GroupingPolicy,
}

impl GroupingEngine {
    pub fn new(policy: GroupingPolicy) -> Self {
        Self::with_strategy(policy, Arc::new(DefaultFingerprint))
    }

    pub fn with_strategy(policy: GroupingPolicy, strategy: Arc<dyn FingerprintStrategy>) -> Self {
        Self { strategy, policy }
    }

    pub fn policy(&self) -> &GroupingPolicy {
        &self.policy
    }

    pub fn fingerprint(&self, item: &RawItem) -> String {
        let group = self.policy.feed_group_of(&item.source_id);
        self.strategy
            .fingerprint(item, group, self.policy.is_mergeable(group))
    }

    /// 依指紋分組，輸出順序為各鍵第一次出現的順序
    pub fn group(&self, items: Vec<RawItem>) -> Vec<SignalUpdate> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut updates: Vec<SignalUpdate> = Vec::new();

        for item in items {
            let key = self.fingerprint(&item);
            match index.get(&key) {
                Some(&i) => updates[i].items.push(item),
                None => {
                    index.insert(key.clone(), updates.len());
                    updates.push(SignalUpdate {
                        key,
                        feed_group: self.policy.feed_group_of(&item.source_id).to_string(),
                        items: vec![item],
                    });
                }
            }
        }
        updates
    }
}
