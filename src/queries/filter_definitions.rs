//! # Filter Definitions for Signal Detections
//!
//! Fetches the filter definitions (by usage: ONSET, FK, DETECTION, ...) for
//! every hypothesis of a set of signal detections within one processing
//! stage.
//!
//! ```text
//! key:    stageId:AL1/signalDetections:SD1;SD2;SD3
//! scope:  same stage
//! split:  MAX_SIGNAL_DETECTIONS_PER_REQUEST detections per request
//! cache:  hypothesis id -> usage -> definition
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identity::KeyBuilder;
use crate::query::Query;
use crate::reconcile::{chunk, missing_items};
use crate::transport::RequestConfig;
use crate::types::{History, HistoryEntry, RequestKey};

/// Largest number of signal detections sent in one physical request.
pub const MAX_SIGNAL_DETECTIONS_PER_REQUEST: usize = 100;

/// A processing stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageId {
    /// Stage name, e.g. `"AL1"`.
    pub name: String,
}

/// A reference to an entity by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity id.
    pub id: String,
}

impl EntityRef {
    /// Creates a reference.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Request arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDefinitionsArgs {
    /// The stage the detections belong to.
    pub stage_id: StageId,
    /// The detections to fetch definitions for.
    pub signal_detections: Vec<EntityRef>,
}

impl FilterDefinitionsArgs {
    /// Creates args for `stage` and detection ids.
    pub fn new<I, S>(stage: impl Into<String>, detections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stage_id: StageId { name: stage.into() },
            signal_detections: detections.into_iter().map(EntityRef::new).collect(),
        }
    }

    fn detection_ids(&self) -> impl Iterator<Item = &str> {
        self.signal_detections.iter().map(|sd| sd.id.as_str())
    }
}

/// Definitions for one signal-detection hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDefinitionsByUsage {
    /// The hypothesis the definitions apply to.
    pub signal_detection_hypothesis: EntityRef,
    /// Filter definition per usage.
    pub filter_definition_by_filter_definition_usage: BTreeMap<String, serde_json::Value>,
}

/// Response of one physical request, and the merged result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDefinitionsResponse {
    /// Definitions per hypothesis.
    #[serde(default)]
    pub filter_definition_by_usage_by_signal_detection_hypothesis: Vec<FilterDefinitionsByUsage>,
}

/// Hypothesis id -> usage -> definition.
pub type FilterDefinitionCache = HashMap<String, BTreeMap<String, serde_json::Value>>;

/// The query.
#[derive(Debug, Clone)]
pub struct FilterDefinitionsForSignalDetections {
    max_per_request: usize,
}

impl Default for FilterDefinitionsForSignalDetections {
    fn default() -> Self {
        Self {
            max_per_request: MAX_SIGNAL_DETECTIONS_PER_REQUEST,
        }
    }
}

impl FilterDefinitionsForSignalDetections {
    /// Overrides the chunk size.
    pub fn with_max_per_request(mut self, max: usize) -> Self {
        self.max_per_request = max.max(1);
        self
    }
}

impl Query for FilterDefinitionsForSignalDetections {
    type Args = FilterDefinitionsArgs;
    type Response = FilterDefinitionsResponse;
    type Output = FilterDefinitionsResponse;
    type Cache = FilterDefinitionCache;

    fn name(&self) -> &str {
        "getFilterDefinitionsForSignalDetections"
    }

    fn id(&self, args: &Self::Args) -> RequestKey {
        KeyBuilder::new()
            .field("stageId", &args.stage_id.name)
            .set("signalDetections", args.detection_ids())
            .build()
    }

    fn should_skip(&self, args: &Self::Args) -> bool {
        args.stage_id.name.is_empty() || args.signal_detections.is_empty()
    }

    fn in_scope(&self, args: &Self::Args, prior: &Self::Args) -> bool {
        args.stage_id == prior.stage_id
    }

    fn transform_args(
        &self,
        args: &Self::Args,
        _history: &History<Self::Args>,
        _key: &RequestKey,
        entries: &[&HistoryEntry<Self::Args>],
    ) -> Self::Args {
        let missing = missing_items(
            args.detection_ids(),
            entries.iter().flat_map(|entry| entry.arg.detection_ids()),
        );
        FilterDefinitionsArgs {
            stage_id: args.stage_id.clone(),
            signal_detections: missing.into_iter().map(EntityRef::new).collect(),
        }
    }

    fn prepare_request_config(
        &self,
        args: &Self::Args,
        base: &RequestConfig,
        _entries: &[&HistoryEntry<Self::Args>],
    ) -> Result<Vec<RequestConfig>> {
        chunk(&args.signal_detections, self.max_per_request)
            .into_iter()
            .map(|signal_detections| -> Result<RequestConfig> {
                let body = FilterDefinitionsArgs {
                    stage_id: args.stage_id.clone(),
                    signal_detections,
                };
                Ok(base.with_data(serde_json::to_value(body)?))
            })
            .collect()
    }

    fn transform_result(&self, _args: &Self::Args, responses: Vec<Self::Response>) -> Self::Output {
        FilterDefinitionsResponse {
            filter_definition_by_usage_by_signal_detection_hypothesis: responses
                .into_iter()
                .flat_map(|r| r.filter_definition_by_usage_by_signal_detection_hypothesis)
                .collect(),
        }
    }

    fn update_state(&self, _args: &Self::Args, output: &Self::Output, cache: &mut Self::Cache) {
        for defs in &output.filter_definition_by_usage_by_signal_detection_hypothesis {
            cache.insert(
                defs.signal_detection_hypothesis.id.clone(),
                defs.filter_definition_by_filter_definition_usage.clone(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::types::{AsyncStatus, HistoryEntry};

    fn entry(args: FilterDefinitionsArgs) -> HistoryEntry<FilterDefinitionsArgs> {
        HistoryEntry {
            arg: args,
            attempts: 1,
            status: AsyncStatus::Fulfilled,
            error: None,
            time: 0,
            sequence: 1,
        }
    }

    #[test]
    fn test_key_format() {
        let query = FilterDefinitionsForSignalDetections::default();
        let key = query.id(&FilterDefinitionsArgs::new("sample", ["B", "A"]));
        assert_eq!(key.as_str(), "stageId:sample/signalDetections:A;B");
    }

    #[test]
    fn test_should_skip() {
        let query = FilterDefinitionsForSignalDetections::default();
        assert!(query.should_skip(&FilterDefinitionsArgs::new("", ["A"])));
        assert!(query.should_skip(&FilterDefinitionsArgs::new("AL1", Vec::<String>::new())));
        assert!(!query.should_skip(&FilterDefinitionsArgs::new("AL1", ["A"])));
    }

    #[test]
    fn test_transform_args_subtracts_covered_detections() {
        let query = FilterDefinitionsForSignalDetections::default();
        let prior = entry(FilterDefinitionsArgs::new("AL1", ["A", "B"]));
        let args = FilterDefinitionsArgs::new("AL1", ["C", "B"]);
        let reduced = query.transform_args(&args, &History::new(), &query.id(&args), &[&prior]);
        assert_eq!(reduced, FilterDefinitionsArgs::new("AL1", ["C"]));
        assert!(!query.in_scope(&args, &FilterDefinitionsArgs::new("AL2", ["C"])));
    }

    #[test]
    fn test_prepare_chunks_detections() {
        let query = FilterDefinitionsForSignalDetections::default().with_max_per_request(2);
        let args = FilterDefinitionsArgs::new("AL1", ["A", "B", "C"]);
        let base = RequestConfig::new("http://svc", "/defs");
        let configs = query.prepare_request_config(&args, &base, &[]).unwrap();

        assert_eq!(configs.len(), 2);
        assert_eq!(
            configs[0].data,
            Some(json!({ "stageId": { "name": "AL1" }, "signalDetections": [{ "id": "A" }, { "id": "B" }] }))
        );
        assert_eq!(
            configs[1].data,
            Some(json!({ "stageId": { "name": "AL1" }, "signalDetections": [{ "id": "C" }] }))
        );
    }

    #[test]
    fn test_merge_and_update_state() {
        let query = FilterDefinitionsForSignalDetections::default();
        let response = |hyp: &str, name: &str| -> FilterDefinitionsResponse {
            serde_json::from_value(json!({
                "filterDefinitionByUsageBySignalDetectionHypothesis": [{
                    "signalDetectionHypothesis": { "id": hyp },
                    "filterDefinitionByFilterDefinitionUsage": { "ONSET": { "name": name } }
                }]
            }))
            .unwrap()
        };

        let args = FilterDefinitionsArgs::new("AL1", ["A", "B"]);
        let merged = query.transform_result(&args, vec![response("h1", "old"), response("h2", "x")]);
        assert_eq!(
            merged.filter_definition_by_usage_by_signal_detection_hypothesis.len(),
            2
        );

        let mut cache = FilterDefinitionCache::new();
        query.update_state(&args, &merged, &mut cache);
        query.update_state(&args, &response("h1", "new"), &mut cache);
        assert_eq!(cache["h1"]["ONSET"], json!({ "name": "new" }));
        assert_eq!(cache["h2"]["ONSET"], json!({ "name": "x" }));
    }
}
