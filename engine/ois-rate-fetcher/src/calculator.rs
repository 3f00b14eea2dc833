use crate::error::{OisError, Result};
use crate::models::{DerivedRates, RawQuote, Tenor};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Decimal places kept from the floating point compounding transform
const COMPOUNDED_SCALE: u32 = 10;

/// Configuration for the rate calculator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculatorConfig {
    /// Transform from the 1M OIS rate to the implied policy rate
    pub implied_transform: ImpliedRateTransform,
}

/// Maps the calculated 1M OIS rate (percent) to the implied overnight policy rate (percent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImpliedRateTransform {
    /// `ff = ois - spread_bps / 100`
    Spread { spread_bps: Decimal },

    /// Inverse of simple-rate compounding of a daily overnight rate over the period:
    /// `ois = ((1 + ff/B)^n - 1) * B/n`, so `ff = B * ((1 + ois*n/B)^(1/n) - 1)`,
    /// then less `spread_bps / 100`.
    Compounded { day_count_basis: u32, period_days: u32, spread_bps: Decimal },
}

impl Default for ImpliedRateTransform {
    fn default() -> Self {
        ImpliedRateTransform::Spread { spread_bps: Decimal::ZERO }
    }
}

impl ImpliedRateTransform {
    /// Check the parameters can produce a finite result
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let ImpliedRateTransform::Compounded { day_count_basis, period_days, .. } = self {
            if *day_count_basis == 0 {
                return Err("compounded transform day_count_basis must be greater than 0".to_string());
            }
            if *period_days == 0 {
                return Err("compounded transform period_days must be greater than 0".to_string());
            }
        }
        Ok(())
    }

    /// Apply the transform to an OIS rate in percent
    pub fn apply(&self, ois_percent: Decimal) -> Result<Decimal> {
        match self {
            ImpliedRateTransform::Spread { spread_bps } => {
                let spread = bps_to_percent(*spread_bps)?;
                ois_percent
                    .checked_sub(spread)
                    .ok_or_else(|| OisError::calculation("implied rate overflowed"))
            }
            ImpliedRateTransform::Compounded { day_count_basis, period_days, spread_bps } => {
                let ois = ois_percent
                    .to_f64()
                    .ok_or_else(|| OisError::calculation("OIS rate not representable as f64"))?
                    / 100.0;
                let basis = f64::from(*day_count_basis);
                let days = f64::from(*period_days);

                let growth = 1.0 + ois * days / basis;
                if !growth.is_finite() || growth <= 0.0 {
                    return Err(OisError::calculation(format!(
                        "period growth factor {} is not positive",
                        growth
                    )));
                }

                let daily = growth.powf(1.0 / days) - 1.0;
                let implied = basis * daily * 100.0;
                if !implied.is_finite() {
                    return Err(OisError::calculation("implied rate is not finite"));
                }

                let implied = Decimal::from_f64(implied)
                    .ok_or_else(|| OisError::calculation("implied rate out of decimal range"))?
                    .round_dp(COMPOUNDED_SCALE);
                let spread = bps_to_percent(*spread_bps)?;
                implied
                    .checked_sub(spread)
                    .ok_or_else(|| OisError::calculation("implied rate overflowed"))
            }
        }
    }
}

fn bps_to_percent(bps: Decimal) -> Result<Decimal> {
    bps.checked_div(Decimal::ONE_HUNDRED)
        .ok_or_else(|| OisError::calculation("spread overflowed"))
}

/// Derives the 1M OIS and implied policy rates from a quote curve
#[derive(Debug, Clone)]
pub struct RateCalculator {
    config: CalculatorConfig,
}

impl RateCalculator {
    pub fn new(config: CalculatorConfig) -> Self {
        Self { config }
    }

    /// Derive both metrics, stamped with the latest quote timestamp
    pub fn derive(&self, quotes: &[RawQuote]) -> Result<DerivedRates> {
        validate_curve(quotes)?;

        let ois_1m = self.calculate_ois_1m(quotes)?;
        let implied_ff = self.config.implied_transform.apply(ois_1m)?;
        let as_of = quotes
            .iter()
            .map(|q| q.as_of)
            .max()
            .ok_or_else(|| OisError::data("quote curve is empty"))?;

        info!(
            "Derived OIS 1M {}% and implied policy rate {}% as of {}",
            ois_1m, implied_ff, as_of
        );

        Ok(DerivedRates::new(as_of, ois_1m, implied_ff))
    }

    /// One-month OIS rate: the exact 1M quote, else linear interpolation between
    /// the nearest tenors either side of one month.
    pub fn calculate_ois_1m(&self, quotes: &[RawQuote]) -> Result<Decimal> {
        let target = Tenor::ONE_MONTH;

        if let Some(exact) = quotes.iter().find(|q| q.tenor == target) {
            debug!("Using exact {} quote {}", exact.tenor, exact.rate);
            return Ok(exact.rate);
        }

        let below = quotes.iter().filter(|q| q.tenor < target).max_by_key(|q| q.tenor);
        let above = quotes.iter().filter(|q| q.tenor > target).min_by_key(|q| q.tenor);

        match (below, above) {
            (Some(lower), Some(upper)) => interpolate(lower, upper, target),
            _ => Err(OisError::calculation(format!(
                "curve [{}] does not bracket {}",
                describe_tenors(quotes),
                target
            ))),
        }
    }

    /// Implied policy rate for a given OIS rate
    pub fn implied_rate(&self, ois_1m: Decimal) -> Result<Decimal> {
        self.config.implied_transform.apply(ois_1m)
    }
}

fn interpolate(lower: &RawQuote, upper: &RawQuote, target: Tenor) -> Result<Decimal> {
    let overflow = || OisError::calculation("interpolation overflowed");

    let t1 = Decimal::from(lower.tenor.year_units());
    let t2 = Decimal::from(upper.tenor.year_units());
    let t = Decimal::from(target.year_units());

    let weight = (t - t1).checked_div(t2 - t1).ok_or_else(overflow)?;
    let rate = upper
        .rate
        .checked_sub(lower.rate)
        .and_then(|spread| spread.checked_mul(weight))
        .and_then(|step| lower.rate.checked_add(step))
        .ok_or_else(overflow)?;

    debug!(
        "Interpolated {} between {}={} and {}={}: {}",
        target, lower.tenor, lower.rate, upper.tenor, upper.rate, rate
    );

    Ok(rate)
}

/// Re-check the structural rules the fetcher enforces
fn validate_curve(quotes: &[RawQuote]) -> Result<()> {
    if quotes.is_empty() {
        return Err(OisError::data("quote curve is empty"));
    }

    let mut seen = HashSet::new();
    for quote in quotes {
        if quote.rate.is_sign_negative() && !quote.rate.is_zero() {
            return Err(OisError::data(format!(
                "negative rate {} for tenor {}",
                quote.rate, quote.tenor
            )));
        }
        if !seen.insert(quote.tenor) {
            return Err(OisError::data(format!("duplicate tenor {} in curve", quote.tenor)));
        }
    }

    Ok(())
}

fn describe_tenors(quotes: &[RawQuote]) -> String {
    quotes.iter().map(|q| q.tenor.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::str::FromStr;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 16, 0, 0).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn curve(points: &[(&str, &str)]) -> Vec<RawQuote> {
        points
            .iter()
            .map(|(tenor, rate)| RawQuote::new(tenor.parse().unwrap(), dec(rate), as_of(), "test"))
            .collect()
    }

    fn calculator_with_spread(bps: &str) -> RateCalculator {
        RateCalculator::new(CalculatorConfig {
            implied_transform: ImpliedRateTransform::Spread { spread_bps: dec(bps) },
        })
    }

    #[test]
    fn test_exact_one_month_quote_used_verbatim() {
        let calc = RateCalculator::new(CalculatorConfig::default());
        let quotes = curve(&[("1W", "5.25"), ("1M", "5.3112345678901"), ("3M", "5.40")]);
        assert_eq!(calc.calculate_ois_1m(&quotes).unwrap(), dec("5.3112345678901"));
    }

    #[test]
    fn test_linear_interpolation_between_bracketing_tenors() {
        let calc = RateCalculator::new(CalculatorConfig::default());
        // 2W = 168 units, 2M = 730 units, 1M = 365 units
        let quotes = curve(&[("2W", "5.00"), ("2M", "5.562")]);
        let rate = calc.calculate_ois_1m(&quotes).unwrap();
        assert!((rate - dec("5.197")).abs() < dec("0.0000000000000000001"), "rate {}", rate);
    }

    #[test]
    fn test_interpolation_uses_nearest_brackets() {
        let calc = RateCalculator::new(CalculatorConfig::default());
        let near = curve(&[("1W", "5.10"), ("2W", "5.20"), ("5W", "5.30"), ("6M", "6.00")]);
        let rate = calc.calculate_ois_1m(&near).unwrap();
        assert!(rate >= dec("5.20") && rate <= dec("5.30"), "rate {} outside nearest bracket", rate);
    }

    #[test]
    fn test_interpolation_is_monotone_within_bracket() {
        let calc = RateCalculator::new(CalculatorConfig::default());
        let cases = [
            ("1W", "4.0", "3M", "4.0"),
            ("1W", "0", "3M", "9.99"),
            ("30D", "5.3333333333", "31D", "5.3333333334"),
            ("1D", "1.23456789", "1Y", "7.65"),
            ("4W", "5.3", "5W", "5.3000000000000000001"),
        ];
        for (t1, r1, t2, r2) in cases {
            let rate = calc.calculate_ois_1m(&curve(&[(t1, r1), (t2, r2)])).unwrap();
            assert!(dec(r1) <= rate && rate <= dec(r2), "{} not within [{}, {}]", rate, r1, r2);
        }
    }

    #[test]
    fn test_curve_that_does_not_bracket_is_rejected() {
        let calc = RateCalculator::new(CalculatorConfig::default());

        let all_below = curve(&[("1W", "5.25"), ("2W", "5.27")]);
        assert!(matches!(calc.derive(&all_below), Err(OisError::Calculation(_))));

        let all_above = curve(&[("2M", "5.35"), ("3M", "5.40")]);
        assert!(matches!(calc.derive(&all_above), Err(OisError::Calculation(_))));
    }

    #[test]
    fn test_structurally_invalid_curves_are_data_errors() {
        let calc = RateCalculator::new(CalculatorConfig::default());

        assert!(matches!(calc.derive(&[]), Err(OisError::Data(_))));

        let negative = curve(&[("1W", "-0.01"), ("3M", "5.40")]);
        assert!(matches!(calc.derive(&negative), Err(OisError::Data(_))));

        let duplicate = curve(&[("12M", "5.0"), ("1Y", "5.1"), ("1W", "5.2")]);
        assert!(matches!(calc.derive(&duplicate), Err(OisError::Data(_))));

        let short_end = curve(&[("ON", "5.30"), ("TN", "5.31"), ("1M", "5.33")]);
        assert!(matches!(calc.derive(&short_end), Err(OisError::Data(_))));
    }

    #[test]
    fn test_spread_transform() {
        let calc = calculator_with_spread("8");
        assert_eq!(calc.implied_rate(dec("5.31")).unwrap(), dec("5.23"));

        let zero = RateCalculator::new(CalculatorConfig::default());
        assert_eq!(zero.implied_rate(dec("5.31")).unwrap(), dec("5.31"));
    }

    #[test]
    fn test_implied_rate_is_deterministic() {
        let transforms = [
            ImpliedRateTransform::Spread { spread_bps: dec("3.5") },
            ImpliedRateTransform::Compounded {
                day_count_basis: 360,
                period_days: 30,
                spread_bps: dec("1"),
            },
        ];
        for transform in transforms {
            let first = transform.apply(dec("5.31")).unwrap();
            for _ in 0..100 {
                assert_eq!(transform.apply(dec("5.31")).unwrap(), first);
            }
        }
    }

    #[test]
    fn test_compounded_transform_inverts_daily_compounding() {
        // Forward relation: ois = ((1 + ff/360)^30 - 1) * 360/30
        let ff = 0.05_f64;
        let ois_percent = ((1.0 + ff / 360.0).powf(30.0) - 1.0) * 12.0 * 100.0;
        let transform = ImpliedRateTransform::Compounded {
            day_count_basis: 360,
            period_days: 30,
            spread_bps: Decimal::ZERO,
        };

        let implied = transform.apply(Decimal::from_f64(ois_percent).unwrap()).unwrap();
        assert!((implied - dec("5.0")).abs() < dec("0.000001"), "implied {}", implied);
        // Compounding makes the term rate exceed the overnight rate
        assert!(Decimal::from_f64(ois_percent).unwrap() > implied);
    }

    #[test]
    fn test_compounded_transform_validation() {
        let bad = ImpliedRateTransform::Compounded {
            day_count_basis: 360,
            period_days: 0,
            spread_bps: Decimal::ZERO,
        };
        assert!(bad.validate().is_err());
        assert!(ImpliedRateTransform::default().validate().is_ok());
    }

    #[test]
    fn test_derive_stamps_latest_quote_time() {
        let calc = calculator_with_spread("0");
        let mut quotes = curve(&[("1W", "5.25"), ("1M", "5.31"), ("3M", "5.40")]);
        let later = as_of() + chrono::Duration::minutes(5);
        quotes[2].as_of = later;

        let derived = calc.derive(&quotes).unwrap();
        assert_eq!(derived.as_of, later);
        assert_eq!(derived.ois_1m.as_of, later);
        assert_eq!(derived.implied_ff.as_of, later);
    }
}
