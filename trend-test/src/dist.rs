use anyhow::Error;
use statrs::function::beta::checked_beta_reg;

/// Upper tail probability of the F distribution with (`df1`, `df2`) degrees of freedom at `f`,
/// i.e. P(F >= f). Degrees of freedom may be fractional, as they are for a smoother's
/// equivalent number of parameters.
///
/// Returns NaN when either degree of freedom is not positive or `f` is NaN.
pub fn f_upper_tail(f: f64, df1: f64, df2: f64) -> Result<f64, Error> {
    if !(df1 > 0.0 && df2 > 0.0) || f.is_nan() {
        return Ok(f64::NAN);
    }
    if f <= 0.0 {
        return Ok(1.0);
    }
    if f.is_infinite() {
        return Ok(0.0);
    }
    // P(F >= f) = I_x(df2 / 2, df1 / 2) with x = df2 / (df2 + df1 f)
    let x = df2 / (df2 + df1 * f);
    let p = checked_beta_reg(df2 / 2.0, df1 / 2.0, x)?;
    Ok(p.clamp(0.0, 1.0))
}

/// Result of comparing a smoother against the constant (intercept-only) model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FTest {
    /// F statistic, 0 when the smoother does not improve on the mean
    pub f_statistic: f64,
    /// numerator degrees of freedom, `edf - 1`
    pub df1: f64,
    /// denominator degrees of freedom, `n - edf`
    pub df2: f64,
    /// upper tail p-value
    pub p_value: f64,
}

/// F test of a fitted smoother with `edf` equivalent parameters (trace of the smoother matrix)
/// and residual sum of squares `rss1`, against the mean model with residual sum of squares
/// `rss0`, on `n` observations.
///
/// A response with no variation (`rss0 == 0`) has nothing to explain and gets p = 1.
/// When the degrees of freedom leave nothing to test the p-value is NaN.
pub fn smoother_f_test(rss0: f64, rss1: f64, edf: f64, n: usize) -> Result<FTest, Error> {
    let df1 = edf - 1.0;
    let df2 = n as f64 - edf;

    if rss0 <= 0.0 {
        return Ok(FTest {
            f_statistic: 0.0,
            df1,
            df2,
            p_value: 1.0,
        });
    }
    if !(df1 > 0.0 && df2 > 0.0) {
        return Ok(FTest {
            f_statistic: f64::NAN,
            df1,
            df2,
            p_value: f64::NAN,
        });
    }

    let f_statistic = if rss1 <= 0.0 {
        f64::INFINITY
    } else {
        (((rss0 - rss1) / df1) / (rss1 / df2)).max(0.0)
    };
    Ok(FTest {
        f_statistic,
        df1,
        df2,
        p_value: f_upper_tail(f_statistic, df1, df2)?,
    })
}
