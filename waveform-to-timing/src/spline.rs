use hrppd_common::Real;

/// Cubic spline through a set of knots with increasing abscissae.
///
/// With four or more knots the first two and the last two intervals share a cubic
/// ("not-a-knot"), so any cubic is reproduced exactly. Three knots give a natural
/// spline and two a straight line. Outside the knot range the spline holds the value of the nearest end knot.
#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline {
    xs: Vec<Real>,
    ys: Vec<Real>,
    second_derivatives: Vec<Real>,
}

impl CubicSpline {
    /// Returns `None` unless there are at least two knots and as many ordinates as abscissae.
    pub fn new(xs: Vec<Real>, ys: Vec<Real>) -> Option<Self> {
        if xs.len() < 2 || xs.len() != ys.len() {
            return None;
        }
        let second_derivatives = second_derivatives(&xs, &ys);
        Some(Self {
            xs,
            ys,
            second_derivatives,
        })
    }

    pub fn knots(&self) -> impl Iterator<Item = (Real, Real)> + '_ {
        self.xs.iter().copied().zip(self.ys.iter().copied())
    }

    /// The abscissae of the first and last knots.
    pub fn domain(&self) -> (Real, Real) {
        (
            self.xs.first().copied().unwrap_or_default(),
            self.xs.last().copied().unwrap_or_default(),
        )
    }

    pub fn eval(&self, x: Real) -> Real {
        let n = self.xs.len();
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[n - 1] {
            return self.ys[n - 1];
        }
        // First knot strictly greater than x, which is never the first knot.
        let hi = self.xs.partition_point(|&knot| knot <= x);
        let lo = hi - 1;
        let h = self.xs[hi] - self.xs[lo];
        let a = (self.xs[hi] - x) / h;
        let b = (x - self.xs[lo]) / h;
        a * self.ys[lo]
            + b * self.ys[hi]
            + (a * (a * a - 1.0) * self.second_derivatives[lo]
                + b * (b * b - 1.0) * self.second_derivatives[hi])
                * h
                * h
                / 6.0
    }
}

/// Second derivatives at every knot.
///
/// Continuity of the first derivative gives one equation per interior knot. Not-a-knot
/// ends fold the outer second derivatives into the first and last of these, otherwise
/// the ends have zero curvature.
fn second_derivatives(xs: &[Real], ys: &[Real]) -> Vec<Real> {
    let n = xs.len();
    let mut s = vec![0.0; n];
    if n < 3 {
        return s;
    }
    let h: Vec<Real> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let m = n - 2;

    // Row i is the equation of knot i + 1.
    let mut lower: Vec<Real> = h[..m].to_vec();
    let mut diagonal: Vec<Real> = (0..m).map(|i| 2.0 * (h[i] + h[i + 1])).collect();
    let mut upper: Vec<Real> = h[1..].to_vec();
    let rhs: Vec<Real> = (0..m)
        .map(|i| 6.0 * ((ys[i + 2] - ys[i + 1]) / h[i + 1] - (ys[i + 1] - ys[i]) / h[i]))
        .collect();

    let not_a_knot = n >= 4;
    if not_a_knot {
        let (h0, h1) = (h[0], h[1]);
        diagonal[0] = (h0 + h1) * (h0 + 2.0 * h1) / h1;
        upper[0] = (h1 * h1 - h0 * h0) / h1;
        let (ha, hb) = (h[m - 1], h[m]);
        diagonal[m - 1] = (ha + hb) * (2.0 * ha + hb) / ha;
        lower[m - 1] = (ha * ha - hb * hb) / ha;
    }

    let interior = solve_tridiagonal(&lower, &diagonal, &upper, &rhs);
    s[1..=m].copy_from_slice(&interior);
    if not_a_knot {
        let (h0, h1) = (h[0], h[1]);
        s[0] = ((h0 + h1) * s[1] - h0 * s[2]) / h1;
        let (ha, hb) = (h[m - 1], h[m]);
        s[m + 1] = ((ha + hb) * s[m] - hb * s[m - 1]) / ha;
    }
    s
}

/// Thomas algorithm. `lower[0]` and the last entry of `upper` are ignored.
fn solve_tridiagonal(lower: &[Real], diagonal: &[Real], upper: &[Real], rhs: &[Real]) -> Vec<Real> {
    let m = diagonal.len();
    let mut cp = vec![0.0; m];
    let mut x = vec![0.0; m];
    for i in 0..m {
        let (sub, prev_cp, prev_x) = if i > 0 {
            (lower[i], cp[i - 1], x[i - 1])
        } else {
            (0.0, 0.0, 0.0)
        };
        let w = diagonal[i] - sub * prev_cp;
        cp[i] = if i + 1 < m { upper[i] / w } else { 0.0 };
        x[i] = (rhs[i] - sub * prev_x) / w;
    }
    for i in (0..m.saturating_sub(1)).rev() {
        x[i] -= cp[i] * x[i + 1];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn too_few_knots() {
        assert!(CubicSpline::new(vec![], vec![]).is_none());
        assert!(CubicSpline::new(vec![1.0], vec![1.0]).is_none());
        assert!(CubicSpline::new(vec![1.0, 2.0], vec![1.0]).is_none());
    }

    #[test]
    fn passes_through_knots() {
        let xs = vec![0.0, 1.0, 2.5, 3.0, 4.0, 6.0];
        let ys = vec![1.0, -2.0, 0.5, 3.0, 3.0, -1.0];
        let spline = CubicSpline::new(xs.clone(), ys.clone()).unwrap();
        for (x, y) in xs.into_iter().zip(ys) {
            assert_approx_eq!(spline.eval(x), y, 1e-12);
        }
        assert_eq!(spline.domain(), (0.0, 6.0));
        assert_eq!(spline.knots().count(), 6);
    }

    #[test]
    fn reproduces_straight_lines() {
        let xs: Vec<Real> = (0..8).map(|i| i as Real * 200.0).collect();
        let ys: Vec<Real> = xs.iter().map(|x| 3.0 - 0.01 * x).collect();
        let spline = CubicSpline::new(xs, ys).unwrap();
        for x in [10.0, 333.0, 777.7, 1399.0] {
            assert_approx_eq!(spline.eval(x), 3.0 - 0.01 * x, 1e-9);
        }
    }

    #[test]
    fn two_knots_interpolate_linearly() {
        let spline = CubicSpline::new(vec![0.0, 2.0], vec![0.0, 4.0]).unwrap();
        assert_approx_eq!(spline.eval(0.5), 1.0);
    }

    #[test]
    fn clamped_outside_knots() {
        let spline = CubicSpline::new(vec![0.0, 1.0, 2.0], vec![5.0, 0.0, 7.0]).unwrap();
        assert_eq!(spline.eval(-3.0), 5.0);
        assert_eq!(spline.eval(10.0), 7.0);
    }

    #[test]
    fn reproduces_cubics() {
        let cubic = |x: Real| 0.5 * x * x * x - 2.0 * x * x + x - 3.0;
        let xs: Vec<Real> = (0..=5).map(Real::from).collect();
        let ys: Vec<Real> = xs.iter().map(|&x| cubic(x)).collect();
        let spline = CubicSpline::new(xs, ys).unwrap();
        for x in [0.25, 0.5, 1.7, 2.5, 3.9, 4.75] {
            assert_approx_eq!(spline.eval(x), cubic(x), 1e-9);
        }
    }

    #[test]
    fn reproduces_parabola_in_end_interval() {
        let xs: Vec<Real> = (0..=5).map(Real::from).collect();
        let ys: Vec<Real> = xs.iter().map(|x| x * x).collect();
        let spline = CubicSpline::new(xs, ys).unwrap();
        assert_approx_eq!(spline.eval(0.5), 0.25, 1e-12);
        assert_approx_eq!(spline.eval(4.5), 20.25, 1e-12);
    }

    #[test]
    fn four_knots_form_one_cubic() {
        let cubic = |x: Real| x * x * x - x;
        let xs = vec![0.0, 1.0, 2.5, 3.0];
        let ys: Vec<Real> = xs.iter().map(|&x| cubic(x)).collect();
        let spline = CubicSpline::new(xs, ys).unwrap();
        for x in [0.3, 1.2, 2.8] {
            assert_approx_eq!(spline.eval(x), cubic(x), 1e-9);
        }
    }

    #[test]
    fn three_knots_are_natural() {
        let spline = CubicSpline::new(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 0.0]).unwrap();
        // Zero curvature at both ends gives s = [0, -3, 0].
        assert_eq!(spline.second_derivatives, vec![0.0, -3.0, 0.0]);
        assert_approx_eq!(spline.eval(0.5), 0.6875, 1e-12);
    }

    #[test]
    fn smooth_curve_is_close_to_source() {
        let xs: Vec<Real> = (0..=20).map(|i| i as Real * 0.1).collect();
        let ys: Vec<Real> = xs.iter().map(|x| x.sin()).collect();
        let spline = CubicSpline::new(xs, ys).unwrap();
        assert_approx_eq!(spline.eval(1.05), 1.05_f64.sin(), 1e-4);
    }
}
