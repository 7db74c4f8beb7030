//! Property-based tests for the RSI calculator using proptest.

use chrono::{Days, NaiveDate};
use nse_screener::error::IndicatorError;
use nse_screener::indicators::{RSI_PERIOD, compute_indicator};
use nse_screener::series::{Session, SessionSeries};
use proptest::prelude::*;

fn series_of(closes: &[f64]) -> SessionSeries {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    SessionSeries::new(
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Session {
                date: start + Days::new(i as u64),
                close,
            })
            .collect(),
    )
    .unwrap()
}

fn arb_price_series(min_len: usize, max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..1000.0_f64, min_len..=max_len)
}

/// Strictly increasing closes built from positive steps.
fn arb_rising(min_len: usize, max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    (1.0..500.0_f64, prop::collection::vec(0.01..10.0_f64, min_len - 1..max_len)).prop_map(
        |(start, steps)| {
            let mut closes = vec![start];
            for step in steps {
                let next = closes[closes.len() - 1] + step;
                closes.push(next);
            }
            closes
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_short_series_is_insufficient(data in arb_price_series(0, RSI_PERIOD - 1)) {
        let err = compute_indicator(&series_of(&data)).unwrap_err();
        prop_assert_eq!(err, IndicatorError::InsufficientData { required: RSI_PERIOD, actual: data.len() });
    }

    #[test]
    fn prop_rows_are_front_aligned(data in arb_price_series(RSI_PERIOD, 120)) {
        let rows = compute_indicator(&series_of(&data)).unwrap();
        prop_assert_eq!(rows.len(), data.len());
        for (i, row) in rows.iter().enumerate() {
            prop_assert_eq!(row.close, data[i]);
            prop_assert_eq!(row.gain.is_some(), i > 0);
            prop_assert_eq!(row.rsi.is_some(), i >= RSI_PERIOD - 1);
        }
    }

    #[test]
    fn prop_gain_and_loss_are_exclusive(data in arb_price_series(RSI_PERIOD, 120)) {
        let rows = compute_indicator(&series_of(&data)).unwrap();
        for row in &rows[1..] {
            let (g, l) = (row.gain.unwrap(), row.loss.unwrap());
            prop_assert!(g >= 0.0 && l >= 0.0);
            prop_assert!(g == 0.0 || l == 0.0);
        }
    }

    #[test]
    fn prop_rsi_is_bounded(data in arb_price_series(RSI_PERIOD, 200)) {
        let rows = compute_indicator(&series_of(&data)).unwrap();
        for row in &rows[RSI_PERIOD - 1..] {
            let rsi = row.rsi.unwrap();
            prop_assert!(!rsi.is_nan());
            prop_assert!((0.0..=100.0).contains(&rsi), "rsi {} out of range", rsi);
        }
    }

    #[test]
    fn prop_rising_series_saturates(data in arb_rising(RSI_PERIOD, 80)) {
        let rows = compute_indicator(&series_of(&data)).unwrap();
        for row in &rows[1..] {
            prop_assert_eq!(row.loss, Some(0.0));
        }
        for row in &rows[RSI_PERIOD - 1..] {
            prop_assert_eq!(row.average_loss, Some(0.0));
            prop_assert_eq!(row.rsi, Some(100.0));
        }
    }

    #[test]
    fn prop_falling_series_floors(data in arb_rising(RSI_PERIOD, 80)) {
        let falling: Vec<f64> = data.iter().rev().copied().collect();
        let rows = compute_indicator(&series_of(&falling)).unwrap();
        for row in &rows[RSI_PERIOD - 1..] {
            prop_assert_eq!(row.rsi, Some(0.0));
        }
    }

    #[test]
    fn prop_recompute_is_identical(data in arb_price_series(RSI_PERIOD, 120)) {
        let series = series_of(&data);
        let first = compute_indicator(&series).unwrap();
        let second = compute_indicator(&series).unwrap();
        for (a, b) in first.iter().zip(&second) {
            prop_assert_eq!(a.rsi.map(f64::to_bits), b.rsi.map(f64::to_bits));
            prop_assert_eq!(a.average_gain.map(f64::to_bits), b.average_gain.map(f64::to_bits));
            prop_assert_eq!(a.average_loss.map(f64::to_bits), b.average_loss.map(f64::to_bits));
        }
    }

    #[test]
    fn prop_appending_keeps_history(data in arb_price_series(RSI_PERIOD, 120), next in 1.0..1000.0_f64) {
        let before = compute_indicator(&series_of(&data)).unwrap();

        let mut extended = data.clone();
        extended.push(next);
        let after = compute_indicator(&series_of(&extended)).unwrap();

        prop_assert_eq!(after.len(), before.len() + 1);
        prop_assert_eq!(&after[..before.len()], &before[..]);
    }
}
