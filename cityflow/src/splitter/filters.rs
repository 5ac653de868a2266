use std::collections::HashSet;

use cityflow_config::shared::{BoundingBoxFilterConfig, FilterConfig, RangeFilterConfig, SpatialMode};

use crate::types::FeatureRow;

/// Verdict of the filter chain for one scanned row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// The row becomes a work item (or a traversal root for groups).
    Accept,
    /// The row is dropped, discovery continues.
    Skip,
    /// The scan window is exhausted; all further discovery stops.
    Stop,
}

/// Per-row filter evaluation in fixed order: range, identifier allow-list,
/// name pattern, bounding box.
///
/// The range filter counts every evaluated row, accepted or not, across all
/// discovery queries of a run, so the chain is created once per run and
/// shared by every scan.
#[derive(Debug)]
pub struct FilterChain {
    range: Option<RangeFilterConfig>,
    identifiers: Option<HashSet<String>>,
    /// Lowercased pattern; names are matched case-insensitively.
    name_pattern: Option<String>,
    bounding_box: Option<BoundingBoxFilterConfig>,
    scanned: u64,
}

impl FilterChain {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            range: config.range.clone(),
            identifiers: config
                .identifiers
                .as_ref()
                .map(|allow| allow.iter().cloned().collect()),
            name_pattern: config.name.as_ref().map(|name| name.pattern.to_lowercase()),
            bounding_box: config.bounding_box.clone(),
            scanned: 0,
        }
    }

    /// Number of rows evaluated so far.
    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    /// Evaluates one row. Positions for the range filter are one-based.
    pub fn evaluate(&mut self, row: &FeatureRow) -> FilterDecision {
        self.scanned += 1;

        if let Some(range) = &self.range {
            if let Some(last) = range.last
                && self.scanned > last
            {
                return FilterDecision::Stop;
            }
            if let Some(first) = range.first
                && self.scanned < first
            {
                return FilterDecision::Skip;
            }
        }

        if let Some(allow) = &self.identifiers {
            match &row.identifier {
                Some(identifier) if allow.contains(identifier) => {}
                _ => return FilterDecision::Skip,
            }
        }

        if let Some(pattern) = &self.name_pattern {
            match &row.name {
                Some(name) if name.to_lowercase().contains(pattern.as_str()) => {}
                _ => return FilterDecision::Skip,
            }
        }

        if let Some(bbox) = &self.bounding_box {
            // A row without an envelope cannot satisfy a spatial filter.
            let Some(envelope) = &row.envelope else {
                return FilterDecision::Skip;
            };
            let hit = match bbox.mode {
                SpatialMode::Contain => bbox.bounds.contains(envelope),
                SpatialMode::Overlap => bbox.bounds.overlaps(envelope),
            };
            if !hit {
                return FilterDecision::Skip;
            }
        }

        FilterDecision::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, FeatureKey, FeatureKind};
    use cityflow_config::shared::NameFilterConfig;

    fn row(key: i64) -> FeatureRow {
        FeatureRow::new(FeatureKey(key), FeatureKind::Building)
    }

    #[test]
    fn no_filters_accept_everything() {
        let mut chain = FilterChain::new(&FilterConfig::default());

        for key in 0..5 {
            assert_eq!(chain.evaluate(&row(key)), FilterDecision::Accept);
        }
        assert_eq!(chain.scanned(), 5);
    }

    #[test]
    fn range_window_skips_then_stops() {
        let config = FilterConfig {
            range: Some(RangeFilterConfig {
                first: Some(3),
                last: Some(4),
            }),
            ..FilterConfig::default()
        };
        let mut chain = FilterChain::new(&config);

        assert_eq!(chain.evaluate(&row(1)), FilterDecision::Skip);
        assert_eq!(chain.evaluate(&row(2)), FilterDecision::Skip);
        assert_eq!(chain.evaluate(&row(3)), FilterDecision::Accept);
        assert_eq!(chain.evaluate(&row(4)), FilterDecision::Accept);
        assert_eq!(chain.evaluate(&row(5)), FilterDecision::Stop);
    }

    #[test]
    fn range_counts_rows_that_other_filters_reject() {
        let config = FilterConfig {
            range: Some(RangeFilterConfig {
                first: None,
                last: Some(2),
            }),
            identifiers: Some(vec!["wanted".to_string()]),
            ..FilterConfig::default()
        };
        let mut chain = FilterChain::new(&config);

        assert_eq!(chain.evaluate(&row(1)), FilterDecision::Skip);
        assert_eq!(
            chain.evaluate(&row(2).with_identifier("wanted")),
            FilterDecision::Accept
        );
        // Row three is beyond the window even though row one was rejected.
        assert_eq!(
            chain.evaluate(&row(3).with_identifier("wanted")),
            FilterDecision::Stop
        );
    }

    #[test]
    fn identifier_allow_list_requires_an_identifier() {
        let config = FilterConfig {
            identifiers: Some(vec!["b-1".to_string(), "b-2".to_string()]),
            ..FilterConfig::default()
        };
        let mut chain = FilterChain::new(&config);

        assert_eq!(
            chain.evaluate(&row(1).with_identifier("b-1")),
            FilterDecision::Accept
        );
        assert_eq!(
            chain.evaluate(&row(2).with_identifier("b-9")),
            FilterDecision::Skip
        );
        assert_eq!(chain.evaluate(&row(3)), FilterDecision::Skip);
    }

    #[test]
    fn name_pattern_matches_case_insensitively() {
        let config = FilterConfig {
            name: Some(NameFilterConfig {
                pattern: "Station".to_string(),
            }),
            ..FilterConfig::default()
        };
        let mut chain = FilterChain::new(&config);

        assert_eq!(
            chain.evaluate(&row(1).with_name("Central STATION hall")),
            FilterDecision::Accept
        );
        assert_eq!(
            chain.evaluate(&row(2).with_name("Town hall")),
            FilterDecision::Skip
        );
        assert_eq!(chain.evaluate(&row(3)), FilterDecision::Skip);
    }

    #[test]
    fn bounding_box_rejects_rows_without_an_envelope() {
        let config = FilterConfig {
            bounding_box: Some(BoundingBoxFilterConfig {
                bounds: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                mode: SpatialMode::Overlap,
            }),
            ..FilterConfig::default()
        };
        let mut chain = FilterChain::new(&config);

        assert_eq!(
            chain.evaluate(&row(1).with_envelope(BoundingBox::new(5.0, 5.0, 15.0, 15.0))),
            FilterDecision::Accept
        );
        assert_eq!(
            chain.evaluate(&row(2).with_envelope(BoundingBox::new(11.0, 11.0, 15.0, 15.0))),
            FilterDecision::Skip
        );
        assert_eq!(chain.evaluate(&row(3)), FilterDecision::Skip);
    }

    #[test]
    fn contain_mode_requires_full_containment() {
        let config = FilterConfig {
            bounding_box: Some(BoundingBoxFilterConfig {
                bounds: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                mode: SpatialMode::Contain,
            }),
            ..FilterConfig::default()
        };
        let mut chain = FilterChain::new(&config);

        assert_eq!(
            chain.evaluate(&row(1).with_envelope(BoundingBox::new(1.0, 1.0, 9.0, 9.0))),
            FilterDecision::Accept
        );
        assert_eq!(
            chain.evaluate(&row(2).with_envelope(BoundingBox::new(5.0, 5.0, 15.0, 15.0))),
            FilterDecision::Skip
        );
    }
}
