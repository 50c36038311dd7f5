//! Two-sample statistics for comparing variants.
//!
//! Welch's unequal-variance t-test with a two-sided p-value from the
//! Student-t distribution, and Cohen's d with a pooled standard deviation.

use serde::{Deserialize, Serialize};

/// Count, mean and unbiased variance of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub n: usize,
    pub mean: f64,
    /// Sample variance (n - 1 denominator); 0 for a single observation.
    pub variance: f64,
}

impl SampleSummary {
    /// Summarizes `values`; `None` when empty.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let n = values.len();
        if n == 0 {
            return None;
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = if n > 1 {
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };
        Some(Self { n, mean, variance })
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Result of Welch's t-test of `treatment` against `control`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WelchTest {
    /// Positive when the treatment mean is higher.
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    /// Two-sided.
    pub p_value: f64,
}

impl WelchTest {
    const NOT_SIGNIFICANT: Self = Self { t_statistic: 0.0, degrees_of_freedom: 0.0, p_value: 1.0 };
}

/// Welch's t-test. Samples with fewer than two observations, or with no
/// variance at all, yield `p = 1` instead of an error or a NaN.
pub fn welch_t_test(control: &SampleSummary, treatment: &SampleSummary) -> WelchTest {
    if control.n < 2 || treatment.n < 2 {
        return WelchTest::NOT_SIGNIFICANT;
    }
    let vc = control.variance / control.n as f64;
    let vt = treatment.variance / treatment.n as f64;
    let se_squared = vc + vt;
    if !se_squared.is_finite() || se_squared <= f64::EPSILON {
        return WelchTest::NOT_SIGNIFICANT;
    }

    let t = (treatment.mean - control.mean) / se_squared.sqrt();
    let df = se_squared.powi(2)
        / (vc.powi(2) / (control.n - 1) as f64 + vt.powi(2) / (treatment.n - 1) as f64);
    if !t.is_finite() || !df.is_finite() || df <= 0.0 {
        return WelchTest::NOT_SIGNIFICANT;
    }

    WelchTest { t_statistic: t, degrees_of_freedom: df, p_value: student_t_two_sided_p(t, df) }
}

/// Cohen's d of `treatment` relative to `control`, using the pooled
/// standard deviation. Zero when the pooled deviation is zero.
pub fn cohens_d(control: &SampleSummary, treatment: &SampleSummary) -> f64 {
    let dof = (control.n + treatment.n).saturating_sub(2);
    if dof == 0 {
        return 0.0;
    }
    let pooled_variance = ((control.n.saturating_sub(1)) as f64 * control.variance
        + (treatment.n.saturating_sub(1)) as f64 * treatment.variance)
        / dof as f64;
    let pooled = pooled_variance.sqrt();
    if pooled <= f64::EPSILON || !pooled.is_finite() {
        return 0.0;
    }
    (treatment.mean - control.mean) / pooled
}

/// Two-sided tail probability of Student's t with `df` degrees of freedom.
pub fn student_t_two_sided_p(t: f64, df: f64) -> f64 {
    let x = df / (df + t * t);
    regularized_incomplete_beta(x, df / 2.0, 0.5).clamp(0.0, 1.0)
}

/// Lanczos approximation of ln Γ(x) for x > 0.
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.001_208_650_973_866_179,
        -0.000_005_395_239_384_953,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut series = 1.000_000_000_190_015;
    for coefficient in COEFFICIENTS {
        y += 1.0;
        series += coefficient / y;
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}

/// Regularized incomplete beta function I_x(a, b).
pub fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    // The continued fraction converges fastest on this side of the mean.
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

/// Lentz's method for the incomplete beta continued fraction.
fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITERATIONS: usize = 300;
    const EPSILON: f64 = 3e-14;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(values: &[f64]) -> SampleSummary {
        SampleSummary::from_values(values).unwrap()
    }

    #[test]
    fn test_summary_mean_and_variance() {
        let s = summary(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((s.mean - 5.0).abs() < 1e-12);
        assert!((s.variance - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(summary(&[3.0]).variance, 0.0);
        assert!(SampleSummary::from_values(&[]).is_none());
    }

    #[test]
    fn test_incomplete_beta_known_values() {
        // I_x(1, 1) is the uniform CDF.
        assert!((regularized_incomplete_beta(0.3, 1.0, 1.0) - 0.3).abs() < 1e-10);
        // I_x(a, b) = 1 - I_{1-x}(b, a)
        let lhs = regularized_incomplete_beta(0.2, 2.5, 4.0);
        let rhs = 1.0 - regularized_incomplete_beta(0.8, 4.0, 2.5);
        assert!((lhs - rhs).abs() < 1e-10);
    }

    #[test]
    fn test_student_t_critical_values() {
        // Two-sided 5% critical values from standard t tables.
        assert!((student_t_two_sided_p(2.228, 10.0) - 0.05).abs() < 1e-3);
        assert!((student_t_two_sided_p(2.042, 30.0) - 0.05).abs() < 1e-3);
        assert!((student_t_two_sided_p(1.980, 120.0) - 0.05).abs() < 1e-3);
        assert!((student_t_two_sided_p(0.0, 12.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_welch_detects_clear_difference() {
        let control = summary(&[70.0, 72.0, 68.0, 71.0, 69.0, 70.0, 73.0, 67.0]);
        let treatment = summary(&[85.0, 88.0, 84.0, 86.0, 87.0, 83.0, 86.0, 85.0]);
        let test = welch_t_test(&control, &treatment);
        assert!(test.t_statistic > 0.0);
        assert!(test.p_value < 1e-6);
        assert!(cohens_d(&control, &treatment) > 2.0);
    }

    #[test]
    fn test_welch_symmetric_in_sign() {
        let a = summary(&[1.0, 2.0, 3.0, 4.0]);
        let b = summary(&[2.0, 3.0, 4.0, 6.0]);
        let ab = welch_t_test(&a, &b);
        let ba = welch_t_test(&b, &a);
        assert!((ab.t_statistic + ba.t_statistic).abs() < 1e-12);
        assert!((ab.p_value - ba.p_value).abs() < 1e-12);
    }

    #[test]
    fn test_zero_variance_is_not_significant() {
        let a = summary(&[80.0; 50]);
        let b = summary(&[90.0; 50]);
        let test = welch_t_test(&a, &b);
        assert_eq!(test.p_value, 1.0);
        assert_eq!(cohens_d(&a, &b), 0.0);
    }

    #[test]
    fn test_small_samples_are_not_significant() {
        let test = welch_t_test(&summary(&[10.0]), &summary(&[90.0, 95.0]));
        assert_eq!(test.p_value, 1.0);
    }
}
