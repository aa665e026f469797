//! Near-duplicate detection over candidate records.
//!
//! Pairs are scored with a weighted multi-field similarity, judged by a
//! [`DuplicateClassifier`], and merged transitively.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use schol_core::{
    DedupMetadata, DedupMethod, DedupReport, Degree, DuplicateGroup, PairScore, ScholarshipRecord,
    ELIGIBILITY_PLACEHOLDER,
};
use schol_llm::{parse_json_object, LanguageModel, LlmError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

pub const NAME_WEIGHT: f64 = 0.4;
pub const PROVIDER_WEIGHT: f64 = 0.3;
pub const AMOUNT_WEIGHT: f64 = 0.2;
pub const DEADLINE_WEIGHT: f64 = 0.1;

/// Relative gap under which two amounts count as the same award.
const AMOUNT_TOLERANCE: f64 = 0.1;

const CLASSIFIER_SYSTEM_PROMPT: &str = "You decide whether two scholarship listings describe \
the same scholarship programme, possibly scraped from different websites. \
Reply with a single JSON object {\"duplicate\": true} or {\"duplicate\": false} and nothing else.";

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Rule verdict: pairs scoring at or above this are duplicates.
    pub duplicate_threshold: f64,
    /// Hybrid: pairs below this are distinct without asking the model.
    pub ambiguous_floor: f64,
    /// Hybrid: pairs at or above this merge without asking the model.
    pub ambiguous_ceiling: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.5,
            ambiguous_floor: 0.3,
            ambiguous_ceiling: 0.8,
        }
    }
}

fn tokens(input: &str) -> BTreeSet<String> {
    input.split_whitespace().map(str::to_lowercase).collect()
}

fn jaccard(a: &str, b: &str) -> Option<f64> {
    let (ta, tb) = (tokens(a), tokens(b));
    if ta.is_empty() || tb.is_empty() {
        return None;
    }
    let shared = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    Some(shared / union)
}

/// First numeric run in an amount string, thousands separators dropped.
pub fn first_amount(raw: &str) -> Option<f64> {
    let found = NUMBER_RE.find(raw)?;
    found.as_str().replace(',', "").parse().ok()
}

fn amounts_close(a: f64, b: f64) -> bool {
    let larger = a.abs().max(b.abs());
    if larger == 0.0 {
        return true;
    }
    (a - b).abs() < AMOUNT_TOLERANCE * larger
}

/// Providers when both sides name one, otherwise both source domains.
fn organisations<'r>(a: &'r ScholarshipRecord, b: &'r ScholarshipRecord) -> (&'r str, &'r str) {
    match (a.provider.as_deref(), b.provider.as_deref()) {
        (Some(x), Some(y)) => (x, y),
        _ => (a.source.as_str(), b.source.as_str()),
    }
}

/// Weighted similarity in `[0, 1]`, renormalized over the fields present on
/// both sides. Symmetric.
pub fn similarity(a: &ScholarshipRecord, b: &ScholarshipRecord) -> f64 {
    let mut weighted = 0.0;
    let mut used = 0.0;

    if let Some(score) = jaccard(&a.name, &b.name) {
        weighted += NAME_WEIGHT * score;
        used += NAME_WEIGHT;
    }
    let (org_a, org_b) = organisations(a, b);
    if let Some(score) = jaccard(org_a, org_b) {
        weighted += PROVIDER_WEIGHT * score;
        used += PROVIDER_WEIGHT;
    }
    let amounts = (
        a.amount.as_deref().and_then(first_amount),
        b.amount.as_deref().and_then(first_amount),
    );
    if let (Some(x), Some(y)) = amounts {
        if amounts_close(x, y) {
            weighted += AMOUNT_WEIGHT;
        }
        used += AMOUNT_WEIGHT;
    }
    if let (Some(x), Some(y)) = (&a.deadline, &b.deadline) {
        if x == y {
            weighted += DEADLINE_WEIGHT;
        }
        used += DEADLINE_WEIGHT;
    }

    if used == 0.0 {
        0.0
    } else {
        weighted / used
    }
}

#[async_trait]
pub trait DuplicateClassifier: Send + Sync {
    async fn is_duplicate(
        &self,
        a: &ScholarshipRecord,
        b: &ScholarshipRecord,
        score: f64,
    ) -> Result<bool, LlmError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RuleClassifier {
    pub threshold: f64,
}

#[async_trait]
impl DuplicateClassifier for RuleClassifier {
    async fn is_duplicate(
        &self,
        _a: &ScholarshipRecord,
        _b: &ScholarshipRecord,
        score: f64,
    ) -> Result<bool, LlmError> {
        Ok(score >= self.threshold)
    }
}

pub struct LlmClassifier {
    model: Arc<dyn LanguageModel>,
}

impl LlmClassifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

fn listing(record: &ScholarshipRecord) -> serde_json::Value {
    json!({
        "name": record.name,
        "provider": record.provider,
        "source": record.source,
        "country": record.country,
        "degree": record.degree,
        "amount": record.amount,
        "deadline": record.deadline,
        "link": record.link,
    })
}

#[async_trait]
impl DuplicateClassifier for LlmClassifier {
    async fn is_duplicate(
        &self,
        a: &ScholarshipRecord,
        b: &ScholarshipRecord,
        _score: f64,
    ) -> Result<bool, LlmError> {
        let prompt = format!("Listing A:\n{}\n\nListing B:\n{}", listing(a), listing(b));
        let answer = self.model.complete(CLASSIFIER_SYSTEM_PROMPT, &prompt).await?;
        parse_json_object(&answer)?
            .get("duplicate")
            .and_then(serde_json::Value::as_bool)
            .ok_or_else(|| LlmError::MalformedJson("missing boolean `duplicate`".into()))
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Joins under the smaller index so roots stay at the earliest member.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[drop] = keep;
        }
    }
}

/// Fills the survivor's empty optional fields from the other members, in order.
fn absorb(survivor: &mut ScholarshipRecord, other: &ScholarshipRecord) {
    if survivor.country.is_none() {
        survivor.country.clone_from(&other.country);
    }
    if survivor.deadline.is_none() {
        survivor.deadline = other.deadline;
    }
    if survivor.amount.is_none() {
        survivor.amount.clone_from(&other.amount);
    }
    if survivor.provider.is_none() {
        survivor.provider.clone_from(&other.provider);
    }
    if survivor.degree == Degree::Any {
        survivor.degree = other.degree;
    }
    if survivor.eligibility == ELIGIBILITY_PLACEHOLDER {
        survivor.eligibility.clone_from(&other.eligibility);
    }
    if survivor.fit_score.is_none() {
        survivor.fit_score = other.fit_score;
    }
    if survivor.match_score.is_none() {
        survivor.match_score = other.match_score;
    }
}

pub struct DedupEngine {
    config: DedupConfig,
    model: Option<Arc<dyn LanguageModel>>,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            model: None,
        }
    }

    pub fn with_model(mut self, model: Option<Arc<dyn LanguageModel>>) -> Self {
        self.model = model;
        self
    }

    async fn judge(
        &self,
        method: DedupMethod,
        rules: &RuleClassifier,
        ai: Option<&LlmClassifier>,
        a: &ScholarshipRecord,
        b: &ScholarshipRecord,
        score: f64,
    ) -> bool {
        let rule_verdict = score >= rules.threshold;
        let ask_model = match method {
            DedupMethod::Rules => false,
            DedupMethod::Ai => true,
            DedupMethod::Hybrid => {
                if score >= self.config.ambiguous_ceiling {
                    return true;
                }
                if score < self.config.ambiguous_floor {
                    return false;
                }
                true
            }
        };
        let Some(ai) = ai.filter(|_| ask_model) else {
            return rule_verdict;
        };
        match ai.is_duplicate(a, b, score).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(a = %a.id, b = %b.id, error = %err, "duplicate classifier failed, using rule verdict");
                rule_verdict
            }
        }
    }

    /// Collapse near-duplicates. `threshold` overrides the configured
    /// duplicate threshold for this call only.
    pub async fn deduplicate(
        &self,
        records: Vec<ScholarshipRecord>,
        method: DedupMethod,
        threshold: Option<f64>,
    ) -> DedupReport {
        let started = Instant::now();
        let original_count = records.len();
        let rules = RuleClassifier {
            threshold: threshold
                .unwrap_or(self.config.duplicate_threshold)
                .clamp(0.0, 1.0),
        };
        let ai = self.model.clone().map(LlmClassifier::new);

        let mut sets = DisjointSet::new(original_count);
        let mut merged_pairs = Vec::new();
        for i in 0..original_count {
            for j in (i + 1)..original_count {
                let score = similarity(&records[i], &records[j]);
                if self
                    .judge(method, &rules, ai.as_ref(), &records[i], &records[j], score)
                    .await
                {
                    debug!(a = %records[i].id, b = %records[j].id, score, "pair judged duplicate");
                    sets.union(i, j);
                    merged_pairs.push((i, j, score));
                }
            }
        }

        let mut members_by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for idx in 0..original_count {
            members_by_root.entry(sets.find(idx)).or_default().push(idx);
        }

        let mut survivors = Vec::new();
        let mut groups = Vec::new();
        for (root, members) in &members_by_root {
            let mut best = members[0];
            for &idx in &members[1..] {
                if records[idx].completeness() > records[best].completeness() {
                    best = idx;
                }
            }
            let mut survivor = records[best].clone();
            for &idx in members.iter().filter(|&&idx| idx != best) {
                absorb(&mut survivor, &records[idx]);
            }

            if members.len() > 1 {
                let scores = merged_pairs
                    .iter()
                    .filter(|(i, _, _)| sets.find(*i) == *root)
                    .map(|(i, j, score)| PairScore {
                        a_id: records[*i].id.clone(),
                        b_id: records[*j].id.clone(),
                        score: *score,
                    })
                    .collect();
                groups.push(DuplicateGroup {
                    survivor_id: survivor.id.clone(),
                    member_ids: members.iter().map(|&idx| records[idx].id.clone()).collect(),
                    scores,
                });
            }
            survivors.push((best, survivor));
        }
        survivors.sort_by_key(|(idx, _)| *idx);
        let deduplicated: Vec<ScholarshipRecord> =
            survivors.into_iter().map(|(_, record)| record).collect();

        let deduplicated_count = deduplicated.len();
        let duplicates_removed = original_count - deduplicated_count;
        let confidence = if merged_pairs.is_empty() {
            1.0
        } else {
            merged_pairs.iter().map(|(_, _, s)| s).sum::<f64>() / merged_pairs.len() as f64
        };
        let deduplication_rate = if original_count == 0 {
            0.0
        } else {
            duplicates_removed as f64 / original_count as f64
        };

        DedupReport {
            deduplicated,
            original_count,
            deduplicated_count,
            duplicates_removed,
            groups,
            metadata: DedupMetadata {
                method,
                deduplication_rate,
                confidence,
                processing_time_ms: started.elapsed().as_millis() as u64,
            },
        }
    }
}
