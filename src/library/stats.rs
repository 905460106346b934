/// Power sums of one window; `None` from [`WindowMoments::collect`] means the
/// window held a non-finite value.
#[derive(Debug, Clone, Copy)]
pub(super) struct WindowMoments {
    pub(super) n: f64,
    pub(super) sum: f64,
    pub(super) sum_sq: f64,
    pub(super) sum_cu: f64,
    pub(super) sum_qu: f64,
}

impl WindowMoments {
    pub(super) fn collect(window: &[f64], order: u8) -> Option<Self> {
        if window.is_empty() {
            return None;
        }
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut sum_cu = 0.0;
        let mut sum_qu = 0.0;
        for &value in window {
            if !value.is_finite() {
                return None;
            }
            sum += value;
            if order >= 2 {
                let sq = value * value;
                sum_sq += sq;
                if order >= 3 {
                    sum_cu += sq * value;
                    if order >= 4 {
                        sum_qu += sq * sq;
                    }
                }
            }
        }
        Some(Self {
            n: window.len() as f64,
            sum,
            sum_sq,
            sum_cu,
            sum_qu,
        })
    }

    #[inline]
    pub(super) fn mean(self) -> f64 {
        self.sum / self.n
    }

    /// Sample standard deviation (`n - 1` denominator).
    #[inline]
    pub(super) fn std(self) -> f64 {
        if self.n <= 1.0 {
            return f64::NAN;
        }
        let m2 = self.sum_sq - (self.sum * self.sum) / self.n;
        let variance = (m2 / (self.n - 1.0)).max(0.0);
        variance.sqrt()
    }

    /// Bias-corrected sample skewness.
    #[inline]
    pub(super) fn skew(self) -> f64 {
        if self.n <= 2.0 {
            return f64::NAN;
        }
        let std = self.std();
        if !std.is_finite() || std <= 0.0 {
            return f64::NAN;
        }
        let mean = self.mean();
        let mean_sq = mean * mean;
        let m3 = self.sum_cu - 3.0 * mean * self.sum_sq + 3.0 * mean_sq * self.sum
            - self.n * mean_sq * mean;
        let denom = (self.n - 1.0) * (self.n - 2.0) * std.powi(3);
        if denom.abs() <= f64::EPSILON {
            f64::NAN
        } else {
            (self.n * m3) / denom
        }
    }

    /// Bias-corrected excess kurtosis.
    #[inline]
    pub(super) fn kurt(self) -> f64 {
        if self.n <= 3.0 {
            return f64::NAN;
        }
        let std = self.std();
        if !std.is_finite() || std <= 0.0 {
            return f64::NAN;
        }
        let mean = self.mean();
        let mean_sq = mean * mean;
        let mean_cu = mean_sq * mean;
        let mean_qu = mean_sq * mean_sq;
        let m4 = self.sum_qu - 4.0 * mean * self.sum_cu + 6.0 * mean_sq * self.sum_sq
            - 4.0 * mean_cu * self.sum
            + self.n * mean_qu;
        let denom = (self.n - 1.0) * (self.n - 2.0) * (self.n - 3.0) * std.powi(4);
        if denom.abs() <= f64::EPSILON {
            f64::NAN
        } else {
            let term1 = (self.n * (self.n + 1.0) * m4) / denom;
            let term2 = 3.0 * (self.n - 1.0).powi(2) / ((self.n - 2.0) * (self.n - 3.0));
            term1 - term2
        }
    }
}

const VAR_NUM_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub(super) struct WindowBivariateMoments {
    pub(super) n: f64,
    pub(super) sum_x: f64,
    pub(super) sum_y: f64,
    pub(super) sum_xx: f64,
    pub(super) sum_yy: f64,
    pub(super) sum_xy: f64,
}

impl WindowBivariateMoments {
    pub(super) fn collect(xs: &[f64], ys: &[f64]) -> Option<Self> {
        if xs.is_empty() || xs.len() != ys.len() {
            return None;
        }
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_xx = 0.0;
        let mut sum_yy = 0.0;
        let mut sum_xy = 0.0;
        for (&x, &y) in xs.iter().zip(ys) {
            if !x.is_finite() || !y.is_finite() {
                return None;
            }
            sum_x += x;
            sum_y += y;
            sum_xx += x * x;
            sum_yy += y * y;
            sum_xy += x * y;
        }
        Some(Self {
            n: xs.len() as f64,
            sum_x,
            sum_y,
            sum_xx,
            sum_yy,
            sum_xy,
        })
    }

    /// Sample covariance.
    pub(super) fn cov(self) -> f64 {
        if self.n <= 1.0 {
            return f64::NAN;
        }
        (self.sum_xy - (self.sum_x * self.sum_y) / self.n) / (self.n - 1.0)
    }

    /// Pearson correlation; NaN when either side is flat.
    pub(super) fn corr(self) -> f64 {
        let cov_num = self.sum_xy - (self.sum_x * self.sum_y) / self.n;
        let var_x_num = self.sum_xx - (self.sum_x * self.sum_x) / self.n;
        let var_y_num = self.sum_yy - (self.sum_y * self.sum_y) / self.n;
        if var_x_num <= VAR_NUM_EPS || var_y_num <= VAR_NUM_EPS {
            return f64::NAN;
        }
        cov_num / (var_x_num.sqrt() * var_y_num.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_std_matches_definition() {
        let m = WindowMoments::collect(&[1.0, 2.0, 3.0, 4.0], 2).expect("finite window");
        assert!((m.mean() - 2.5).abs() < 1e-12);
        assert!((m.std() - (5.0_f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn skew_and_kurt_follow_pandas_conventions() {
        // pandas: Series([1, 2, 3, 10]).skew() / .kurt()
        let m = WindowMoments::collect(&[1.0, 2.0, 3.0, 10.0], 4).expect("finite window");
        assert!((m.skew() - 1.7636326148038879).abs() < 1e-9, "{}", m.skew());
        assert!((m.kurt() - 3.228).abs() < 1e-9, "{}", m.kurt());
    }

    #[test]
    fn non_finite_window_has_no_moments() {
        assert!(WindowMoments::collect(&[1.0, f64::NAN], 1).is_none());
        assert!(WindowBivariateMoments::collect(&[1.0, 2.0], &[f64::INFINITY, 1.0]).is_none());
    }

    #[test]
    fn corr_and_cov() {
        let m = WindowBivariateMoments::collect(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0])
            .expect("finite window");
        assert!((m.corr() - 1.0).abs() < 1e-12);
        assert!((m.cov() - 2.0).abs() < 1e-12);
        let flat = WindowBivariateMoments::collect(&[1.0, 1.0], &[1.0, 2.0]).expect("finite");
        assert!(flat.corr().is_nan());
    }
}
