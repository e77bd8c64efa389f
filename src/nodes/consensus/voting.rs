//! Cross-source voting over the detections of one image.
//!
//! A detection is accepted when enough other sources saw an overlapping
//! object. Each source contributes at most one match per group (its best
//! overlap above the IOU threshold), and detections used by an accepted
//! group are consumed so they cannot vote twice.

use std::collections::BTreeMap;

use crate::core::runtime_context::IdGenerator;
use crate::core::segment::Segment;
use crate::domain::model::Detection;
use crate::error::{StepError, StepResult};

use super::merge::{merge_detections, AggregationMode};

/// Key of the presence confidence when classes are not told apart.
pub const ANY_OBJECT: &str = "any_object";

/// How many consensus detections must exist for the object to be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequiredObjects {
    Total(u64),
    PerClass(BTreeMap<String, u64>),
}

impl RequiredObjects {
    /// Reads a count or a class-to-count mapping; `None` means no
    /// requirement.
    pub fn from_segment(value: &Segment, what: &str) -> StepResult<Option<Self>> {
        match value {
            Segment::None => Ok(None),
            Segment::Object(map) => map
                .iter()
                .map(|(class, count)| Ok((class.clone(), as_count(count, what)?)))
                .collect::<StepResult<BTreeMap<_, _>>>()
                .map(|counts| Some(RequiredObjects::PerClass(counts))),
            other => as_count(other, what).map(|n| Some(RequiredObjects::Total(n))),
        }
    }

    pub fn total(&self) -> u64 {
        match self {
            RequiredObjects::Total(n) => *n,
            RequiredObjects::PerClass(counts) => counts.values().sum(),
        }
    }
}

/// Reads a non-negative whole number.
pub fn as_count(value: &Segment, what: &str) -> StepResult<u64> {
    match value {
        Segment::Integer(n) if *n >= 0 => Ok(*n as u64),
        Segment::Float(f) if *f >= 0.0 && f.fract() == 0.0 => Ok(*f as u64),
        other => Err(StepError::TypeError(format!(
            "{}: expected a non-negative integer, found {}",
            what,
            other.type_name()
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusParams {
    pub required_votes: u64,
    pub class_aware: bool,
    pub iou_threshold: f64,
    pub confidence: f64,
    pub classes_to_consider: Option<Vec<String>>,
    pub required_objects: Option<RequiredObjects>,
    pub presence_confidence_aggregation: AggregationMode,
    pub detections_merge_confidence_aggregation: AggregationMode,
    pub detections_merge_coordinates_aggregation: AggregationMode,
}

impl ConsensusParams {
    pub fn new(required_votes: u64) -> Self {
        Self {
            required_votes,
            class_aware: true,
            iou_threshold: 0.3,
            confidence: 0.0,
            classes_to_consider: None,
            required_objects: None,
            presence_confidence_aggregation: AggregationMode::Max,
            detections_merge_confidence_aggregation: AggregationMode::Average,
            detections_merge_coordinates_aggregation: AggregationMode::Average,
        }
    }

    fn admits(&self, detection: &Detection) -> bool {
        detection.confidence > self.confidence
            && self
                .classes_to_consider
                .as_ref()
                .map_or(true, |classes| classes.contains(&detection.class_name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusOutcome {
    /// Image every source predicted against; `None` when all were empty.
    pub parent_id: Option<String>,
    pub object_present: bool,
    pub presence_confidence: BTreeMap<String, f64>,
    pub detections: Vec<Detection>,
}

/// Runs consensus over `sources`, the per-source predictions for one image.
pub fn resolve_batch_consensus(
    sources: &[Vec<Detection>],
    params: &ConsensusParams,
    ids: &dyn IdGenerator,
) -> StepResult<ConsensusOutcome> {
    let parent_id = common_parent_id(sources)?;
    let candidates: Vec<Vec<&Detection>> = sources
        .iter()
        .map(|source| source.iter().filter(|d| params.admits(d)).collect())
        .collect();
    let mut consumed: Vec<Vec<bool>> = candidates.iter().map(|c| vec![false; c.len()]).collect();
    let quorum = params.required_votes.saturating_sub(1);

    let mut detections = Vec::new();
    for (source, source_candidates) in candidates.iter().enumerate() {
        for (index, &seed) in source_candidates.iter().enumerate() {
            if consumed[source][index] {
                continue;
            }
            let matches = best_matches(seed, source, &candidates, &consumed, params);
            if (matches.len() as u64) < quorum {
                continue;
            }
            let members: Vec<&Detection> = std::iter::once(seed)
                .chain(matches.iter().map(|&(s, i)| candidates[s][i]))
                .collect();
            let Some(mut merged) = merge_detections(
                &members,
                params.detections_merge_confidence_aggregation,
                params.detections_merge_coordinates_aggregation,
                String::new(),
            ) else {
                continue;
            };
            if merged.confidence < params.confidence {
                continue;
            }
            // ids are only drawn for accepted detections
            merged.id = ids.next_id();
            consumed[source][index] = true;
            for &(s, i) in &matches {
                consumed[s][i] = true;
            }
            detections.push(merged);
        }
    }

    let (object_present, presence_confidence) = check_presence(
        &detections,
        params.class_aware,
        params.presence_confidence_aggregation,
        params.required_objects.as_ref(),
    );
    tracing::trace!(
        accepted = detections.len(),
        object_present,
        "consensus resolved"
    );
    Ok(ConsensusOutcome {
        parent_id,
        object_present,
        presence_confidence,
        detections,
    })
}

fn common_parent_id(sources: &[Vec<Detection>]) -> StepResult<Option<String>> {
    let mut parent_id: Option<&str> = None;
    for detection in sources.iter().flatten() {
        match parent_id {
            None => parent_id = Some(detection.parent_id.as_str()),
            Some(seen) if seen != detection.parent_id => {
                return Err(StepError::ExecutionGraphError(format!(
                    "Mismatch in predictions: consensus sources carry different parent \
                     identifiers ({} and {}), whereas consensus can only be applied to \
                     predictions made against the same input",
                    seen, detection.parent_id
                )));
            }
            Some(_) => {}
        }
    }
    Ok(parent_id.map(str::to_string))
}

/// Per other source, the unconsumed detection overlapping `seed` the most
/// (strictly above the threshold, first seen wins ties).
fn best_matches(
    seed: &Detection,
    seed_source: usize,
    candidates: &[Vec<&Detection>],
    consumed: &[Vec<bool>],
    params: &ConsensusParams,
) -> Vec<(usize, usize)> {
    let seed_box = seed.bounding_box();
    let mut matches = Vec::new();
    for (source, detections) in candidates.iter().enumerate() {
        if source == seed_source {
            continue;
        }
        let mut best: Option<(usize, f64)> = None;
        for (index, other) in detections.iter().enumerate() {
            if consumed[source][index] {
                continue;
            }
            if params.class_aware && other.class_name != seed.class_name {
                continue;
            }
            let iou = seed_box.iou(&other.bounding_box());
            if iou <= params.iou_threshold {
                continue;
            }
            if best.map_or(true, |(_, best_iou)| best_iou < iou) {
                best = Some((index, iou));
            }
        }
        if let Some((index, _)) = best {
            matches.push((source, index));
        }
    }
    matches
}

/// Object presence verdict and its confidence, overall or per class.
pub fn check_presence(
    detections: &[Detection],
    class_aware: bool,
    mode: AggregationMode,
    required: Option<&RequiredObjects>,
) -> (bool, BTreeMap<String, f64>) {
    if detections.is_empty() {
        return (false, BTreeMap::new());
    }
    if !class_aware {
        let required = required.map_or(0, RequiredObjects::total);
        if (detections.len() as u64) < required {
            return (false, BTreeMap::new());
        }
        let confidence = mode.aggregate(detections.iter().map(|d| d.confidence));
        return (true, BTreeMap::from([(ANY_OBJECT.to_string(), confidence)]));
    }

    let mut by_class: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for detection in detections {
        by_class
            .entry(detection.class_name.clone())
            .or_default()
            .push(detection.confidence);
    }
    let satisfied = match required {
        None => true,
        Some(RequiredObjects::Total(n)) => detections.len() as u64 >= *n,
        Some(RequiredObjects::PerClass(counts)) => counts.iter().all(|(class, count)| {
            by_class.get(class).map_or(0, Vec::len) as u64 >= *count
        }),
    };
    if !satisfied {
        return (false, BTreeMap::new());
    }
    let confidence = by_class
        .into_iter()
        .map(|(class, values)| (class, mode.aggregate(values)))
        .collect();
    (true, confidence)
}
