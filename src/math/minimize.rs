//! Derivative-free minimizers.
//!
//! - [`brent_bounded`]: Brent's method on a closed interval (golden section with
//!   parabolic steps). Used for one knot at a time.
//! - [`nelder_mead`]: downhill simplex for small unconstrained problems (time
//!   shifts, magnitude/flux offsets). Convergence follows the usual absolute
//!   tolerances on the simplex spread in `x` and in `f`.
//!
//! Objective values that are `NaN` are treated as `+∞` so a failed trial can never
//! win.

/// (3 - sqrt(5)) / 2
const GOLDEN: f64 = 0.381_966_011_250_105;

/// Result of a bounded scalar minimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundedMinimum {
    pub x: f64,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Minimize `f` on `[a, b]` with absolute tolerance `xatol` on the abscissa.
pub fn brent_bounded<F>(f: F, a: f64, b: f64, xatol: f64, max_iter: usize) -> BoundedMinimum
where
    F: Fn(f64) -> f64,
{
    let eval = |x: f64| sanitize(f(x));
    let sqrt_eps = f64::EPSILON.sqrt();

    let (mut a, mut b) = if a <= b { (a, b) } else { (b, a) };
    let mut x = a + GOLDEN * (b - a);
    let mut w = x;
    let mut v = x;
    let mut fx = eval(x);
    let mut fw = fx;
    let mut fv = fx;
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    for iter in 0..max_iter {
        let mid = 0.5 * (a + b);
        let tol1 = sqrt_eps * x.abs() + xatol / 3.0;
        let tol2 = 2.0 * tol1;

        if (x - mid).abs() <= tol2 - 0.5 * (b - a) {
            return BoundedMinimum {
                x,
                value: fx,
                iterations: iter,
                converged: true,
            };
        }

        let mut use_golden = true;
        if e.abs() > tol1 {
            // Parabola through x, w, v.
            let r = (x - w) * (fx - fv);
            let q = (x - v) * (fx - fw);
            let p = (x - v) * q - (x - w) * r;
            let q = 2.0 * (q - r);
            let (p, q) = if q > 0.0 { (-p, q) } else { (p, -q) };

            let e_old = e;
            e = d;
            if p.abs() < (0.5 * q * e_old).abs() && p > q * (a - x) && p < q * (b - x) {
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = if x < mid { tol1 } else { -tol1 };
                }
                use_golden = false;
            }
        }
        if use_golden {
            e = if x < mid { b - x } else { a - x };
            d = GOLDEN * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else if d > 0.0 {
            x + tol1
        } else {
            x - tol1
        };
        let fu = eval(u);

        if fu <= fx {
            if u < x {
                b = x;
            } else {
                a = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }

    BoundedMinimum {
        x,
        value: fx,
        iterations: max_iter,
        converged: false,
    }
}

/// Stopping rules for [`nelder_mead`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplexOptions {
    /// Absolute tolerance on the simplex spread in parameter space.
    pub xatol: f64,
    /// Absolute tolerance on the spread of objective values.
    pub fatol: f64,
    /// Evaluation budget. `None` means `200 × dimension`.
    pub max_evals: Option<usize>,
}

impl Default for SimplexOptions {
    fn default() -> Self {
        Self {
            xatol: 1e-4,
            fatol: 1e-4,
            max_evals: None,
        }
    }
}

/// Result of a simplex minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub evaluations: usize,
    pub converged: bool,
}

/// Nelder–Mead downhill simplex starting at `x0`.
///
/// The initial simplex perturbs each coordinate by 5% (or by `0.00025` when the
/// coordinate is zero).
pub fn nelder_mead<F>(mut f: F, x0: &[f64], opts: &SimplexOptions) -> Minimum
where
    F: FnMut(&[f64]) -> f64,
{
    const REFLECT: f64 = 1.0;
    const EXPAND: f64 = 2.0;
    const CONTRACT: f64 = 0.5;
    const SHRINK: f64 = 0.5;

    let dim = x0.len();
    let max_evals = opts.max_evals.unwrap_or(200 * dim.max(1));
    let mut evals = 0usize;
    let mut eval = |x: &[f64], evals: &mut usize| {
        *evals += 1;
        sanitize(f(x))
    };

    if dim == 0 {
        let value = eval(x0, &mut evals);
        return Minimum {
            x: Vec::new(),
            value,
            evaluations: evals,
            converged: true,
        };
    }

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(dim + 1);
    simplex.push(x0.to_vec());
    for k in 0..dim {
        let mut y = x0.to_vec();
        y[k] = if y[k] != 0.0 { 1.05 * y[k] } else { 0.00025 };
        simplex.push(y);
    }
    let mut values: Vec<f64> = simplex.iter().map(|p| eval(p, &mut evals)).collect();
    sort_simplex(&mut simplex, &mut values);

    let mut converged = false;
    while evals < max_evals {
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|p| p.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0_f64, f64::max);
        let f_spread = values[1..]
            .iter()
            .map(|v| (v - values[0]).abs())
            .fold(0.0_f64, f64::max);
        if x_spread <= opts.xatol && f_spread <= opts.fatol {
            converged = true;
            break;
        }

        let centroid: Vec<f64> = (0..dim)
            .map(|k| simplex[..dim].iter().map(|p| p[k]).sum::<f64>() / dim as f64)
            .collect();
        let worst = simplex[dim].clone();
        let along = |coef: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&worst)
                .map(|(c, w)| (1.0 + coef) * c - coef * w)
                .collect()
        };

        let xr = along(REFLECT);
        let fr = eval(&xr, &mut evals);
        let mut shrink = false;

        if fr < values[0] {
            let xe = along(REFLECT * EXPAND);
            let fe = eval(&xe, &mut evals);
            if fe < fr {
                simplex[dim] = xe;
                values[dim] = fe;
            } else {
                simplex[dim] = xr;
                values[dim] = fr;
            }
        } else if fr < values[dim - 1] {
            simplex[dim] = xr;
            values[dim] = fr;
        } else if fr < values[dim] {
            let xc = along(CONTRACT * REFLECT);
            let fc = eval(&xc, &mut evals);
            if fc <= fr {
                simplex[dim] = xc;
                values[dim] = fc;
            } else {
                shrink = true;
            }
        } else {
            let xcc = along(-CONTRACT);
            let fcc = eval(&xcc, &mut evals);
            if fcc < values[dim] {
                simplex[dim] = xcc;
                values[dim] = fcc;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = simplex[0].clone();
            for j in 1..=dim {
                for (p, b) in simplex[j].iter_mut().zip(&best) {
                    *p = b + SHRINK * (*p - b);
                }
                values[j] = eval(&simplex[j], &mut evals);
            }
        }
        sort_simplex(&mut simplex, &mut values);
    }

    Minimum {
        x: simplex.swap_remove(0),
        value: values[0],
        evaluations: evals,
        converged,
    }
}

fn sort_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    *simplex = order.iter().map(|&i| simplex[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}

fn sanitize(v: f64) -> f64 {
    if v.is_nan() { f64::INFINITY } else { v }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brent_finds_parabola_minimum() {
        let res = brent_bounded(|x| (x - 2.5).powi(2) + 1.0, 0.0, 10.0, 1e-6, 100);
        assert!(res.converged);
        assert!((res.x - 2.5).abs() < 1e-4);
        assert!((res.value - 1.0).abs() < 1e-8);
    }

    #[test]
    fn brent_stays_inside_bounds() {
        let res = brent_bounded(|x| x, 3.0, 4.0, 1e-5, 100);
        assert!(res.x >= 3.0 && res.x <= 4.0);
        assert!(res.x < 3.001);
    }

    #[test]
    fn simplex_minimizes_rosenbrock() {
        let rosen = |p: &[f64]| (1.0 - p[0]).powi(2) + 100.0 * (p[1] - p[0] * p[0]).powi(2);
        let opts = SimplexOptions {
            xatol: 1e-6,
            fatol: 1e-10,
            max_evals: Some(2000),
        };
        let res = nelder_mead(rosen, &[-1.2, 1.0], &opts);
        assert!(res.converged);
        assert!((res.x[0] - 1.0).abs() < 1e-3 && (res.x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn simplex_respects_the_evaluation_budget() {
        let opts = SimplexOptions {
            xatol: 0.0,
            fatol: 0.0,
            max_evals: Some(30),
        };
        let res = nelder_mead(|p: &[f64]| (p[0] - 7.0).abs(), &[0.0], &opts);
        // One iteration may overrun the budget by a shrink step at most.
        assert!(res.evaluations <= 32);
    }

    #[test]
    fn nan_objective_never_wins() {
        let res = nelder_mead(
            |p: &[f64]| if p[0] > 1.0 { f64::NAN } else { (p[0] - 0.5).powi(2) },
            &[0.2],
            &SimplexOptions::default(),
        );
        assert!((res.x[0] - 0.5).abs() < 0.01);
        assert!(res.value.is_finite());
    }
}
