//! # Processing Mask Definitions
//!
//! Fetches processing mask definitions per channel, phase and processing
//! operation for one station group.
//!
//! Coverage is tracked in pairs. A prior request covers every
//! (channel, phase) pair of its channels and phases, for each of its
//! operations. A new demand only asks for the pairs nobody asked for yet,
//! grouped so that channels missing the same phases share a request:
//!
//! ```text
//! prior:    EVENT_BEAM  CH1,CH2 x P
//! demand:   EVENT_BEAM  CH1,CH2,CH3 x P,S
//!
//! requests: EVENT_BEAM  CH1,CH2 x S       (P already covered)
//!           EVENT_BEAM  CH3     x P,S
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identity::{uniq_sort_strings, KeyBuilder};
use crate::query::Query;
use crate::reconcile::{chunk, determine_missing_pairs, missing_items, PairCoverage};
use crate::transport::RequestConfig;
use crate::types::{History, HistoryEntry, RequestKey};

/// Largest number of channels sent in one physical request.
pub const MAX_CHANNELS_PER_REQUEST: usize = 100;

/// A station group at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationGroup {
    /// Group name.
    pub name: String,
    /// Effective time, epoch seconds.
    pub effective_at: f64,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

/// A versioned channel reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef {
    /// Channel name.
    pub name: String,
    /// Version time, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_at: Option<f64>,
}

impl ChannelRef {
    /// Creates an unversioned reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            effective_at: None,
        }
    }
}

/// Request arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMaskDefinitionsArgs {
    /// The station group.
    pub station_group: StationGroup,
    /// Channels to fetch masks for.
    pub channels: Vec<ChannelRef>,
    /// Processing operations, e.g. `"EVENT_BEAM"`.
    pub processing_operations: Vec<String>,
    /// Phases, e.g. `"P"`.
    pub phase_types: Vec<String>,
}

impl ProcessingMaskDefinitionsArgs {
    fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    /// Channels of these args with the given names, unique and sorted by name.
    fn channels_named(&self, names: &[String]) -> Vec<ChannelRef> {
        let mut channels: Vec<ChannelRef> = Vec::new();
        for channel in &self.channels {
            if names.contains(&channel.name) && !channels.iter().any(|c| c.name == channel.name) {
                channels.push(channel.clone());
            }
        }
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        channels
    }
}

/// One processing mask definition. Only the operation is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMaskDefinition {
    /// The operation this definition applies to.
    pub processing_operation: String,
    /// Remaining fields, passed through.
    #[serde(flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Definitions for one channel, by phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMaskDefinitionsByPhaseByChannel {
    /// The channel.
    pub channel: ChannelRef,
    /// Definitions per phase.
    pub processing_mask_definition_by_phase: BTreeMap<String, Vec<ProcessingMaskDefinition>>,
}

/// Response of one physical request, and the merged result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMaskDefinitionsResponse {
    /// Definitions per channel.
    #[serde(default)]
    pub processing_mask_definition_by_phase_by_channel: Vec<ProcessingMaskDefinitionsByPhaseByChannel>,
}

/// Channel name -> phase -> processing operation -> definition.
pub type ProcessingMaskCache =
    HashMap<String, BTreeMap<String, BTreeMap<String, ProcessingMaskDefinition>>>;

/// The query.
#[derive(Debug, Clone)]
pub struct ProcessingMaskDefinitions {
    max_channels_per_request: usize,
}

impl Default for ProcessingMaskDefinitions {
    fn default() -> Self {
        Self {
            max_channels_per_request: MAX_CHANNELS_PER_REQUEST,
        }
    }
}

impl ProcessingMaskDefinitions {
    /// Overrides the chunk size.
    pub fn with_max_channels_per_request(mut self, max: usize) -> Self {
        self.max_channels_per_request = max.max(1);
        self
    }
}

/// Entries whose request included `operation`.
fn entries_for_operation<'e>(
    entries: &[&'e HistoryEntry<ProcessingMaskDefinitionsArgs>],
    operation: &str,
) -> Vec<&'e HistoryEntry<ProcessingMaskDefinitionsArgs>> {
    entries
        .iter()
        .copied()
        .filter(|entry| entry.arg.processing_operations.iter().any(|op| op == operation))
        .collect()
}

impl Query for ProcessingMaskDefinitions {
    type Args = ProcessingMaskDefinitionsArgs;
    type Response = ProcessingMaskDefinitionsResponse;
    type Output = ProcessingMaskDefinitionsResponse;
    type Cache = ProcessingMaskCache;

    fn name(&self) -> &str {
        "getProcessingMaskDefinitions"
    }

    fn id(&self, args: &Self::Args) -> RequestKey {
        KeyBuilder::new()
            .field("stationGroup", &args.station_group.name)
            .set("processingOperations", &args.processing_operations)
            .set("phases", &args.phase_types)
            .set("channels", args.channels.iter().map(|c| c.name.as_str()))
            .build()
    }

    fn should_skip(&self, args: &Self::Args) -> bool {
        args.station_group.name.is_empty()
            || args.station_group.effective_at < 0.0
            || args.channels.is_empty()
            || args.processing_operations.is_empty()
            || args.phase_types.is_empty()
    }

    fn in_scope(&self, args: &Self::Args, prior: &Self::Args) -> bool {
        args.station_group == prior.station_group
    }

    fn transform_args(
        &self,
        args: &Self::Args,
        _history: &History<Self::Args>,
        _key: &RequestKey,
        entries: &[&HistoryEntry<Self::Args>],
    ) -> Self::Args {
        let requested_channels = args.channel_names();
        let mut missing_channels = Vec::new();
        let mut missing_phases = Vec::new();

        for operation in &args.processing_operations {
            let by_op = entries_for_operation(entries, operation);
            let names: Vec<Vec<String>> = by_op.iter().map(|e| e.arg.channel_names()).collect();
            let coverage: Vec<PairCoverage<'_>> = by_op
                .iter()
                .zip(&names)
                .map(|(entry, names)| PairCoverage {
                    entities: names,
                    qualifiers: &entry.arg.phase_types,
                })
                .collect();

            let (channels, phases) =
                determine_missing_pairs(&requested_channels, &args.phase_types, &coverage);
            missing_channels.extend(channels);
            missing_phases.extend(phases);
        }

        ProcessingMaskDefinitionsArgs {
            station_group: args.station_group.clone(),
            channels: args.channels_named(&uniq_sort_strings(missing_channels)),
            processing_operations: uniq_sort_strings(&args.processing_operations),
            phase_types: uniq_sort_strings(missing_phases),
        }
    }

    fn prepare_request_config(
        &self,
        args: &Self::Args,
        base: &RequestConfig,
        entries: &[&HistoryEntry<Self::Args>],
    ) -> Result<Vec<RequestConfig>> {
        let mut configs = Vec::new();

        for operation in &args.processing_operations {
            let by_op = entries_for_operation(entries, operation);

            // Channels grouped by the exact set of phases they still need.
            let mut channels_by_phases: BTreeMap<Vec<String>, Vec<String>> = BTreeMap::new();
            for channel in &args.channels {
                let requested = by_op
                    .iter()
                    .filter(|e| e.arg.channels.iter().any(|c| c.name == channel.name))
                    .flat_map(|e| e.arg.phase_types.iter().map(String::as_str));
                let not_requested =
                    missing_items(args.phase_types.iter().map(String::as_str), requested);
                if !not_requested.is_empty() {
                    channels_by_phases
                        .entry(not_requested)
                        .or_default()
                        .push(channel.name.clone());
                }
            }

            for (phases, names) in channels_by_phases {
                let channels = args.channels_named(&names);
                for chunked in chunk(&channels, self.max_channels_per_request) {
                    let body = ProcessingMaskDefinitionsArgs {
                        station_group: args.station_group.clone(),
                        processing_operations: vec![operation.clone()],
                        channels: chunked,
                        phase_types: phases.clone(),
                    };
                    configs.push(base.with_data(serde_json::to_value(body)?));
                }
            }
        }

        Ok(configs)
    }

    fn transform_result(&self, _args: &Self::Args, responses: Vec<Self::Response>) -> Self::Output {
        ProcessingMaskDefinitionsResponse {
            processing_mask_definition_by_phase_by_channel: responses
                .into_iter()
                .flat_map(|r| r.processing_mask_definition_by_phase_by_channel)
                .collect(),
        }
    }

    fn update_state(&self, _args: &Self::Args, output: &Self::Output, cache: &mut Self::Cache) {
        for by_channel in &output.processing_mask_definition_by_phase_by_channel {
            let by_phase = cache.entry(by_channel.channel.name.clone()).or_default();
            for (phase, defs) in &by_channel.processing_mask_definition_by_phase {
                let by_op = by_phase.entry(phase.clone()).or_default();
                for def in defs {
                    by_op.insert(def.processing_operation.clone(), def.clone());
                }
            }
        }
    }
}
