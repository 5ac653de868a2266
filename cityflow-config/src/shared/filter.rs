use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::ValidationError;

/// Discovery filters for one transfer run.
///
/// Filters are evaluated per discovered row in a fixed order: range,
/// identifier allow-list, name pattern, bounding box. A row must pass every
/// configured filter to become a work item.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Positional window over the scanned rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeFilterConfig>,

    /// Allow-list of external identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<Vec<String>>,

    /// Case-insensitive substring match against the feature name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<NameFilterConfig>,

    /// Spatial filter against the feature envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBoxFilterConfig>,
}

impl FilterConfig {
    /// Validates all configured filters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(range) = &self.range {
            range.validate()?;
        }

        if let Some(name) = &self.name
            && name.pattern.is_empty()
        {
            return Err(ValidationError::InvalidFieldValue {
                field: "name.pattern",
                constraint: "must not be empty",
            });
        }

        if let Some(bounding_box) = &self.bounding_box {
            bounding_box.bounds.validate()?;
        }

        Ok(())
    }
}

impl Config for FilterConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["identifiers"];
}

/// Skip scanned rows before `first`, stop discovery after `last`.
///
/// Positions are one-based and count every scanned row, accepted or not,
/// across all discovery queries of the run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeFilterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<u64>,
}

impl RangeFilterConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(first), Some(last)) = (self.first, self.last)
            && first > last
        {
            return Err(ValidationError::InvalidFieldValue {
                field: "range.first",
                constraint: "must not exceed `range.last`",
            });
        }

        Ok(())
    }
}

/// Substring pattern matched case-insensitively against feature names.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NameFilterConfig {
    pub pattern: String,
}

/// Spatial filter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoundingBoxFilterConfig {
    pub bounds: BoundingBox,

    /// How the feature envelope must relate to `bounds`.
    ///
    /// Default: overlap.
    #[serde(default)]
    pub mode: SpatialMode,
}

/// Spatial predicate applied by the bounding-box filter.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpatialMode {
    /// The feature envelope must lie entirely inside the filter bounds.
    Contain,
    /// The feature envelope must intersect the filter bounds.
    Overlap,
}

impl Default for SpatialMode {
    fn default() -> Self {
        Self::Overlap
    }
}

/// Axis-aligned 2D bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Whether `other` lies entirely inside this box. Edges count as inside.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.min_x >= self.min_x
            && other.min_y >= self.min_y
            && other.max_x <= self.max_x
            && other.max_y <= self.max_y
    }

    /// Whether `other` intersects this box. Touching edges count as overlap.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        other.min_x <= self.max_x
            && other.max_x >= self.min_x
            && other.min_y <= self.max_y
            && other.max_y >= self.min_y
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_x > self.max_x || self.min_y > self.max_y {
            return Err(ValidationError::InvalidFieldValue {
                field: "bounding_box.bounds",
                constraint: "minimum corner must not exceed maximum corner",
            });
        }

        Ok(())
    }
}
