use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::BoundingBox;

/// Store-assigned primary key of a feature.
///
/// [`FeatureKey`] is stable for the lifetime of one transfer and is the
/// identity under which group traversal tracks visited nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureKey(pub i64);

impl FeatureKey {
    /// Returns the raw key value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for FeatureKey {
    fn from(key: i64) -> Self {
        FeatureKey(key)
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a transferable feature.
///
/// [`FeatureKind`] is the discriminator carried by every discovery row and
/// work item. It selects the codec used to process an item and drives the
/// per-kind counters in the end-of-run summary. Each kind maps to the stable
/// numeric class id used by the store layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FeatureKind {
    Building,
    CityFurniture,
    LandUse,
    WaterBody,
    PlantCover,
    SolitaryVegetationObject,
    TransportationComplex,
    ReliefFeature,
    GenericCityObject,
    /// Aggregating feature whose members may be any other kind, including
    /// other groups. Groups are traversed, not scanned.
    CityObjectGroup,
    Appearance,
}

impl FeatureKind {
    /// All kinds, in the order discovery queries are issued.
    pub const ALL: &'static [FeatureKind] = &[
        FeatureKind::Building,
        FeatureKind::CityFurniture,
        FeatureKind::LandUse,
        FeatureKind::WaterBody,
        FeatureKind::PlantCover,
        FeatureKind::SolitaryVegetationObject,
        FeatureKind::TransportationComplex,
        FeatureKind::ReliefFeature,
        FeatureKind::GenericCityObject,
        FeatureKind::CityObjectGroup,
        FeatureKind::Appearance,
    ];

    /// Returns the stable numeric class id of this kind in the store schema.
    pub fn type_id(&self) -> i32 {
        match self {
            FeatureKind::LandUse => 4,
            FeatureKind::GenericCityObject => 5,
            FeatureKind::SolitaryVegetationObject => 7,
            FeatureKind::PlantCover => 8,
            FeatureKind::WaterBody => 9,
            FeatureKind::ReliefFeature => 14,
            FeatureKind::CityFurniture => 21,
            FeatureKind::CityObjectGroup => 23,
            FeatureKind::Building => 26,
            FeatureKind::TransportationComplex => 42,
            FeatureKind::Appearance => 50,
        }
    }

    /// Returns the kind for a numeric class id, if it maps to a
    /// transferable kind.
    pub fn from_type_id(type_id: i32) -> Option<FeatureKind> {
        match type_id {
            4 => Some(FeatureKind::LandUse),
            5 => Some(FeatureKind::GenericCityObject),
            7 => Some(FeatureKind::SolitaryVegetationObject),
            8 => Some(FeatureKind::PlantCover),
            9 => Some(FeatureKind::WaterBody),
            14 => Some(FeatureKind::ReliefFeature),
            21 => Some(FeatureKind::CityFurniture),
            23 => Some(FeatureKind::CityObjectGroup),
            26 => Some(FeatureKind::Building),
            42 => Some(FeatureKind::TransportationComplex),
            50 => Some(FeatureKind::Appearance),
            _ => None,
        }
    }

    /// Returns true if this kind aggregates other features.
    pub fn is_group(&self) -> bool {
        matches!(self, FeatureKind::CityObjectGroup)
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "Building"),
            Self::CityFurniture => write!(f, "CityFurniture"),
            Self::LandUse => write!(f, "LandUse"),
            Self::WaterBody => write!(f, "WaterBody"),
            Self::PlantCover => write!(f, "PlantCover"),
            Self::SolitaryVegetationObject => write!(f, "SolitaryVegetationObject"),
            Self::TransportationComplex => write!(f, "TransportationComplex"),
            Self::ReliefFeature => write!(f, "ReliefFeature"),
            Self::GenericCityObject => write!(f, "GenericCityObject"),
            Self::CityObjectGroup => write!(f, "CityObjectGroup"),
            Self::Appearance => write!(f, "Appearance"),
        }
    }
}

/// One row produced by a discovery query.
///
/// [`FeatureRow`] carries everything the filter chain evaluates, so
/// filtering stays independent of the store behind the discovery seam.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// Primary key of the feature in the source store.
    pub key: FeatureKey,
    /// Category of the feature.
    pub kind: FeatureKind,
    /// External identifier, when the feature carries one.
    pub identifier: Option<String>,
    /// Human-readable name, when the feature carries one.
    pub name: Option<String>,
    /// Spatial envelope of the feature, when one is stored.
    pub envelope: Option<BoundingBox>,
    /// Feature document carried into the work item for import-direction
    /// transfers. Store-backed discovery leaves this unset.
    pub payload: Option<serde_json::Value>,
}

impl FeatureRow {
    /// Creates a row with only the mandatory identity fields set.
    pub fn new(key: FeatureKey, kind: FeatureKind) -> Self {
        Self {
            key,
            kind,
            identifier: None,
            name: None,
            envelope: None,
            payload: None,
        }
    }

    /// Sets the external identifier of this row.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Sets the name of this row.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the spatial envelope of this row.
    pub fn with_envelope(mut self, envelope: BoundingBox) -> Self {
        self.envelope = Some(envelope);
        self
    }

    /// Attaches the feature document of this row.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
