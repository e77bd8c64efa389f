//! Merging a group of corroborating detections into one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::model::{round_coordinate, Detection};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    #[default]
    Max,
    Min,
    Average,
}

impl AggregationMode {
    /// Aggregates `values`; an empty slice yields `0.0`.
    pub fn aggregate(self, values: impl IntoIterator<Item = f64>) -> f64 {
        let mut count = 0usize;
        let mut acc: Option<f64> = None;
        for value in values {
            count += 1;
            acc = Some(match (self, acc) {
                (_, None) => value,
                (AggregationMode::Max, Some(a)) => a.max(value),
                (AggregationMode::Min, Some(a)) => a.min(value),
                (AggregationMode::Average, Some(a)) => a + value,
            });
        }
        match (self, acc) {
            (_, None) => 0.0,
            (AggregationMode::Average, Some(sum)) => sum / count as f64,
            (_, Some(a)) => a,
        }
    }
}

impl fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregationMode::Max => "max",
            AggregationMode::Min => "min",
            AggregationMode::Average => "average",
        })
    }
}

/// Merges `members` (the seed first) into one detection with id `id`.
///
/// The confidence mode also picks the class: the most or least confident
/// member's class for `max`/`min`, the majority class for `average`.
/// Returns `None` for an empty group.
pub fn merge_detections(
    members: &[&Detection],
    confidence_mode: AggregationMode,
    box_mode: AggregationMode,
    id: String,
) -> Option<Detection> {
    let first = members.first()?;
    let confidence = confidence_mode.aggregate(members.iter().map(|d| d.confidence));
    let (class_name, class_id) = select_class(members, confidence_mode, confidence)?;
    let (x, y, width, height) = aggregate_box(members, box_mode)?;
    Some(Detection {
        id,
        parent_id: first.parent_id.clone(),
        class_name,
        class_id,
        confidence,
        x,
        y,
        width,
        height,
    })
}

fn select_class(
    members: &[&Detection],
    mode: AggregationMode,
    confidence: f64,
) -> Option<(String, i64)> {
    let chosen = match mode {
        AggregationMode::Max | AggregationMode::Min => {
            members.iter().find(|d| d.confidence == confidence)?
        }
        AggregationMode::Average => {
            // first-encountered order, so ties go to the earliest class
            let mut counts: Vec<(&str, usize)> = Vec::new();
            for member in members {
                match counts.iter_mut().find(|(name, _)| *name == member.class_name) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((&member.class_name, 1)),
                }
            }
            let mut majority = counts.first()?;
            for entry in &counts {
                if entry.1 > majority.1 {
                    majority = entry;
                }
            }
            members.iter().find(|d| d.class_name == majority.0)?
        }
    };
    Some((chosen.class_name.clone(), chosen.class_id))
}

fn aggregate_box(members: &[&Detection], mode: AggregationMode) -> Option<(f64, f64, f64, f64)> {
    let pick = |better: fn(f64, f64) -> bool| {
        let mut chosen = *members.first()?;
        for &member in &members[1..] {
            if better(member.area(), chosen.area()) {
                chosen = member;
            }
        }
        Some((chosen.x, chosen.y, chosen.width, chosen.height))
    };
    match mode {
        AggregationMode::Max => pick(|a, b| a > b),
        AggregationMode::Min => pick(|a, b| a < b),
        AggregationMode::Average => {
            let mean = |f: fn(&Detection) -> f64| {
                round_coordinate(AggregationMode::Average.aggregate(members.iter().map(|d| f(d))))
            };
            Some((
                mean(|d| d.x),
                mean(|d| d.y),
                mean(|d| d.width),
                mean(|d| d.height),
            ))
        }
    }
}
