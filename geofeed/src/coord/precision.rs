//! Viewport span to geohash precision mapping.
//!
//! Wide views use short (coarse) hashes so one prefix scan covers a lot of
//! ground. Precision is capped at [`DEFAULT_MAX_PRECISION`] even when fully
//! zoomed in: below [`DEFAULT_TINY_SPAN`] the selector deliberately broadens
//! again so a marker sitting just across a fine cell boundary is still
//! fetched. Results are trimmed to the exact viewport in memory afterwards.
//!
//! | span (degrees) | precision |
//! |----------------|-----------|
//! | >= 10          | 2         |
//! | 1 - 10         | 3         |
//! | 0.1 - 1        | 4         |
//! | < 0.1          | 3         |

/// Default highest precision ever selected.
pub const DEFAULT_MAX_PRECISION: usize = 4;

/// Spans below this are treated as "extreme zoom".
pub const DEFAULT_TINY_SPAN: f64 = 0.1;

/// Precision used at extreme zoom.
pub const DEFAULT_TINY_PRECISION: usize = 3;

/// One row of the step table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionStep {
    /// Smallest latitude span (inclusive) this step applies to.
    pub min_span: f64,
    /// Precision selected for spans at or above `min_span`.
    pub precision: usize,
}

/// Maps a viewport's latitude span to a geohash query precision.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecisionSelector {
    /// Steps sorted by descending `min_span`.
    steps: Vec<PrecisionStep>,
    tiny_precision: usize,
    max_precision: usize,
}

impl Default for PrecisionSelector {
    fn default() -> Self {
        Self::new(
            vec![
                PrecisionStep {
                    min_span: 10.0,
                    precision: 2,
                },
                PrecisionStep {
                    min_span: 1.0,
                    precision: 3,
                },
                PrecisionStep {
                    min_span: DEFAULT_TINY_SPAN,
                    precision: 4,
                },
            ],
            DEFAULT_TINY_PRECISION,
            DEFAULT_MAX_PRECISION,
        )
    }
}

impl PrecisionSelector {
    /// Creates a selector from a step table.
    ///
    /// Spans smaller than every step's `min_span` select `tiny_precision`.
    /// Every result is clamped to `1..=max_precision`.
    pub fn new(mut steps: Vec<PrecisionStep>, tiny_precision: usize, max_precision: usize) -> Self {
        steps.sort_by(|a, b| b.min_span.total_cmp(&a.min_span));
        Self {
            steps,
            tiny_precision,
            max_precision: max_precision.max(1),
        }
    }

    /// Precision to query with for a viewport spanning `span_lat` degrees.
    pub fn select(&self, span_lat: f64) -> usize {
        // NaN is treated as the widest possible view.
        let span = if span_lat.is_nan() {
            f64::INFINITY
        } else {
            span_lat.abs()
        };

        let precision = self
            .steps
            .iter()
            .find(|step| span >= step.min_span)
            .map_or(self.tiny_precision, |step| step.precision);

        precision.clamp(1, self.max_precision)
    }

    /// Highest precision this selector can return.
    pub fn max_precision(&self) -> usize {
        self.max_precision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let selector = PrecisionSelector::default();
        assert_eq!(selector.select(45.0), 2);
        assert_eq!(selector.select(10.0), 2);
        assert_eq!(selector.select(5.0), 3);
        assert_eq!(selector.select(1.0), 3);
        assert_eq!(selector.select(0.5), 4);
        assert_eq!(selector.select(0.1), 4);
        assert_eq!(selector.select(0.05), 3);
        assert_eq!(selector.select(0.0), 3);
    }

    #[test]
    fn test_never_exceeds_cap() {
        let selector = PrecisionSelector::default();
        let mut span = 180.0;
        while span > 1e-6 {
            assert!(selector.select(span) <= DEFAULT_MAX_PRECISION);
            span /= 1.7;
        }
    }

    #[test]
    fn test_nan_and_negative_spans() {
        let selector = PrecisionSelector::default();
        assert_eq!(selector.select(f64::NAN), 2);
        assert_eq!(selector.select(-0.5), 4);
    }

    #[test]
    fn test_custom_table_sorted_and_clamped() {
        let selector = PrecisionSelector::new(
            vec![
                PrecisionStep {
                    min_span: 0.01,
                    precision: 9,
                },
                PrecisionStep {
                    min_span: 1.0,
                    precision: 1,
                },
            ],
            2,
            5,
        );
        assert_eq!(selector.select(2.0), 1);
        assert_eq!(selector.select(0.5), 5);
        assert_eq!(selector.select(0.001), 2);
    }
}
