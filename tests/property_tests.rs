//! Property-based tests for trueno-capture
//!
//! Following ruchy/trueno/aprender pattern:
//! - Test alignment invariants
//! - Test naming determinism
//! - Run with ProptestConfig::with_cases(100)
//! - Must complete in <30 seconds for pre-commit hook

use chrono::{DateTime, TimeDelta, Utc};
use proptest::prelude::*;
use trueno_capture::align::SampleAligner;
use trueno_capture::catalog::MetricCatalog;
use trueno_capture::dataset::{parse_artifact, ArtifactKind, CaptureKey};
use trueno_capture::query::{Labels, QueryWindow, RawSeries, Sample};

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Window of 1..=120 steps of 1..=30 seconds.
fn arb_window() -> impl Strategy<Value = QueryWindow> {
    (1_600_000_000i64..1_900_000_000, 1i64..=30, 1i64..=120).prop_map(|(start, step, steps)| {
        let start = DateTime::from_timestamp(start, 0).unwrap();
        QueryWindow::new(
            start,
            start + TimeDelta::seconds(step * steps),
            TimeDelta::seconds(step),
        )
        .unwrap()
    })
}

/// Samples at arbitrary millisecond offsets around the window, some non-finite.
fn arb_samples(window: QueryWindow) -> impl Strategy<Value = Vec<Sample>> {
    let span = window.end().timestamp_millis() - window.start().timestamp_millis();
    let value = prop_oneof![
        8 => -1.0e6f64..1.0e6,
        1 => Just(f64::NAN),
        1 => Just(f64::INFINITY),
    ];
    proptest::collection::vec((-span / 4..span + span / 4, any::<bool>(), value), 0..200).prop_map(
        move |raw| {
            raw.into_iter()
                .map(|(offset, snap, v)| {
                    // Bias half the samples onto the grid
                    let offset = if snap {
                        offset - offset.rem_euclid(window.step_ms())
                    } else {
                        offset
                    };
                    Sample::new(window.start() + TimeDelta::milliseconds(offset), v)
                })
                .collect()
        },
    )
}

fn arb_window_and_series() -> impl Strategy<Value = (QueryWindow, Vec<Vec<Sample>>)> {
    arb_window().prop_flat_map(|w| (Just(w), proptest::collection::vec(arb_samples(w), 0..4)))
}

fn arb_metric_key() -> impl Strategy<Value = String> {
    "[a-z0-9_]{1,32}"
}

fn arb_start() -> impl Strategy<Value = DateTime<Utc>> {
    (946_684_800i64..4_102_444_800).prop_map(|s| DateTime::from_timestamp(s, 0).unwrap())
}

fn to_raw(series: Vec<Vec<Sample>>) -> Vec<RawSeries> {
    series
        .into_iter()
        .enumerate()
        .map(|(i, samples)| {
            let labels: Labels = [("pod".to_string(), format!("pod-{i}"))].into_iter().collect();
            RawSeries::new(labels, samples)
        })
        .collect()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: every label-set has exactly one slot per grid point
    #[test]
    fn prop_every_series_covers_the_grid((window, series) in arb_window_and_series()) {
        let catalog = MetricCatalog::standard();
        let n = series.len();
        let aligned = SampleAligner::new(window, 4).align(catalog.get("cpu_usage").unwrap(), to_raw(series));

        prop_assert_eq!(aligned.label_sets().len(), n);
        for set in aligned.label_sets() {
            prop_assert_eq!(set.values.len(), window.len());
        }
        prop_assert_eq!(aligned.rows().count(), n * window.len());
    }

    /// Property: rows never leave the grid
    #[test]
    fn prop_rows_on_grid((window, series) in arb_window_and_series()) {
        let catalog = MetricCatalog::standard();
        let aligned = SampleAligner::new(window, 4).align(catalog.get("cpu_usage").unwrap(), to_raw(series));

        for row in aligned.rows() {
            prop_assert!(window.contains(row.timestamp));
            prop_assert!(window.grid_index(row.timestamp).is_some());
        }
    }

    /// Property: stored values are finite and come from an on-grid sample
    #[test]
    fn prop_no_invented_values((window, series) in arb_window_and_series()) {
        let catalog = MetricCatalog::standard();
        let raw = to_raw(series);
        let aligned = SampleAligner::new(window, 4).align(catalog.get("cpu_usage").unwrap(), raw.clone());

        for (set, original) in aligned.label_sets().iter().zip(&raw) {
            for (idx, value) in set.values.iter().enumerate() {
                if let Some(v) = value {
                    prop_assert!(v.is_finite());
                    let first = original
                        .samples
                        .iter()
                        .find(|s| window.grid_index(s.timestamp) == Some(idx))
                        .map(|s| s.value);
                    prop_assert_eq!(first, Some(*v));
                }
            }
        }
    }

    /// Property: window length is span/step + 1
    #[test]
    fn prop_window_len(window in arb_window()) {
        let span = window.end().timestamp_millis() - window.start().timestamp_millis();
        let expected = usize::try_from(span / window.step_ms()).unwrap() + 1;
        prop_assert_eq!(window.len(), expected);
        prop_assert_eq!(window.grid().count(), expected);
        prop_assert_eq!(window.grid().last(), Some(window.end()));
    }

    /// Property: artifact names parse back to what produced them
    #[test]
    fn prop_metric_name_round_trip(metric in arb_metric_key(), start in arb_start(), replicas in 1u32..64) {
        let key = CaptureKey::new("resnet50", replicas, start);
        let parsed = parse_artifact("resnet50", replicas, &key.metric_file(&metric)).unwrap();

        prop_assert_eq!(parsed.stamp, key.stamp());
        prop_assert_eq!(parsed.kind, ArtifactKind::Metric(metric));
    }

    /// Property: naming is a pure function of its inputs
    #[test]
    fn prop_naming_deterministic(metric in arb_metric_key(), start in arb_start()) {
        let a = CaptureKey::new("whisper", 8, start);
        let b = CaptureKey::new("whisper", 8, start);
        prop_assert_eq!(a.metric_file(&metric), b.metric_file(&metric));
        prop_assert_eq!(a.manifest_file(), b.manifest_file());
    }

    /// Property: captures started in different seconds never collide
    #[test]
    fn prop_distinct_starts_distinct_names(start in arb_start(), delta in 1i64..86_400) {
        let a = CaptureKey::new("distilbert", 2, start);
        let b = CaptureKey::new("distilbert", 2, start + TimeDelta::seconds(delta));
        prop_assert_ne!(a.metric_file("gpu_power"), b.metric_file("gpu_power"));
        prop_assert_ne!(a.timestamps_file(), b.timestamps_file());
    }
}
