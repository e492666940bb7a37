use mathru::special::beta;
use num_traits::Float;

/// Evaluates a polynomial with coefficients ordered from the constant term
/// upward at the point x, via Horner's rule.
pub fn polyval<T : Float>(coefs : &[T], x : T) -> T {
    coefs.iter().rev().fold(T::zero(), |acc, c| acc * x + *c )
}

/// Survival function (right-tail probability) of the F distribution with
/// df_num and df_den degrees of freedom, computed from the regularized
/// incomplete beta function. Used to convert the F approximations of the
/// multivariate test statistics into significance values.
pub fn f_survival(f : f64, df_num : f64, df_den : f64) -> f64 {
    if df_num <= 0.0 || df_den <= 0.0 || !f.is_finite() {
        return f64::NAN;
    }
    if f <= 0.0 {
        return 1.0;
    }
    let x = df_den / (df_den + df_num * f);
    beta::beta_inc_reg(x, df_den / 2.0, df_num / 2.0)
}

/// Median of a sample; the sample need not be sorted. Returns zero on an
/// empty slice.
pub fn median(values : &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal) );
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Median absolute deviation about the sample median.
pub fn mad(values : &[f64]) -> f64 {
    let m = median(values);
    let devs : Vec<f64> = values.iter().map(|v| (v - m).abs() ).collect();
    median(&devs)
}

#[cfg(test)]
mod test {

    use super::*;

    const EPS : f64 = 1e-6;

    #[test]
    fn horner() {
        // 1 + 2x + 3x^2 at x = 2
        assert!((polyval(&[1.0, 2.0, 3.0], 2.0) - 17.0).abs() < EPS);
        assert!((polyval(&[5.0], 100.0) - 5.0).abs() < EPS);
    }

    #[test]
    fn f_tail() {
        // F(1, 10): sf(4.96) ~ 0.05 (tabulated critical value)
        let p = f_survival(4.9646, 1.0, 10.0);
        assert!((p - 0.05).abs() < 1e-3);

        // sf at zero is one; sf is decreasing in f
        assert!((f_survival(0.0, 3.0, 20.0) - 1.0).abs() < EPS);
        assert!(f_survival(2.0, 3.0, 20.0) > f_survival(5.0, 3.0, 20.0));
    }

    #[test]
    fn medians() {
        assert!((median(&[3.0, 1.0, 2.0]) - 2.0).abs() < EPS);
        assert!((median(&[4.0, 1.0, 3.0, 2.0]) - 2.5).abs() < EPS);
        assert!((mad(&[1.0, 1.0, 2.0, 2.0, 4.0, 6.0, 9.0]) - 1.0).abs() < EPS);
    }

}
