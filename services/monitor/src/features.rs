//! Feature extraction for the AKI classifier.
//!
//! The model was trained on exactly five inputs in this order:
//! `[min_creatinine, median_creatinine, age, sex_f, latest_creatinine]`.
//! Reordering is a silent correctness bug, so the vector is built in one
//! place and nowhere else.

use crate::storage::PatientView;
use hl7_core::Hl7Timestamp;

pub const FEATURE_COUNT: usize = 5;

const DAYS_PER_YEAR: f64 = 365.25;

/// The view has no labs, so there is nothing to score.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("no creatinine observations to extract features from")]
pub struct InsufficientData;

/// Build the model's input vector from a patient view as of `reference`.
///
/// Deterministic: the same view and reference date always produce the same
/// bits.
pub fn extract(
    view: &PatientView,
    reference: &Hl7Timestamp,
) -> Result<[f64; FEATURE_COUNT], InsufficientData> {
    let levels = &view.creatinine_levels;
    if levels.is_empty() {
        return Err(InsufficientData);
    }

    let min = levels.iter().copied().fold(f64::INFINITY, f64::min);
    let latest = levels[levels.len() - 1];

    let days = reference.days_from_civil() - view.dob.days_from_civil();
    let age = (days as f64 / DAYS_PER_YEAR).floor();

    Ok([min, median(levels), age, view.sex.as_flag() as f64, latest])
}

/// Median over the values; for even counts, the mean of the two central ones.
fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl7_core::Sex;

    fn ts(compact: &str) -> Hl7Timestamp {
        Hl7Timestamp::parse(compact).unwrap().unwrap()
    }

    fn view(levels: &[f64]) -> PatientView {
        PatientView {
            dob: ts("19600101000000"),
            sex: Sex::Male,
            dates: levels.iter().map(|_| ts("20240101120000")).collect(),
            creatinine_levels: levels.to_vec(),
        }
    }

    #[test]
    fn single_observation_min_median_latest_coincide() {
        let features = extract(&view(&[250.0]), &ts("20240101120000")).unwrap();
        assert_eq!(features, [250.0, 250.0, 64.0, 0.0, 250.0]);
    }

    #[test]
    fn even_count_median_is_the_central_mean() {
        let features = extract(&view(&[100.0, 90.0, 120.0, 110.0]), &ts("20240101120000")).unwrap();
        assert_eq!(features[1], 105.0);
    }

    #[test]
    fn latest_is_by_insertion_order_not_by_value() {
        let features = extract(&view(&[150.0, 90.0]), &ts("20240101120000")).unwrap();
        assert_eq!(features[0], 90.0);
        assert_eq!(features[4], 90.0);
    }

    #[test]
    fn age_floors_partial_years() {
        let mut v = view(&[100.0]);
        v.dob = ts("19600102000000");
        // One day short of the 64th birthday
        let features = extract(&v, &ts("20240101120000")).unwrap();
        assert_eq!(features[2], 63.0);
    }

    #[test]
    fn sex_flag_is_passed_through() {
        let mut v = view(&[100.0]);
        v.sex = Sex::Female;
        let features = extract(&v, &ts("20240101120000")).unwrap();
        assert_eq!(features[3], 1.0);
    }

    #[test]
    fn empty_view_is_insufficient() {
        assert_eq!(
            extract(&view(&[]), &ts("20240101120000")),
            Err(InsufficientData)
        );
    }

    #[test]
    fn extraction_is_deterministic() {
        let v = view(&[103.4, 99.1, 120.7]);
        let reference = ts("20240101120000");
        let first = extract(&v, &reference).unwrap();
        for _ in 0..10 {
            assert_eq!(extract(&v, &reference).unwrap(), first);
        }
    }
}
