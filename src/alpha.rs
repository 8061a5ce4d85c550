//! Newton-Raphson re-estimation of the asymmetric Dirichlet prior.

use ndarray::Array1;

use crate::math;

#[derive(Debug, Clone)]
pub(crate) struct NewtonOptions {
    // Base of the step-decay backoff, raised to the current decay power
    pub decay_factor: f64,
    // Backoff attempts before the update is abandoned
    pub max_decay: u32,
    pub threshold: f64,
    pub max_iter: usize,
}

/// Maximizes the prior term of the bound in `alpha`, given the per-topic
/// sufficient statistics `ss` accumulated over `num_docs` documents.
///
/// The Hessian is diagonal plus a rank-one term, so each Newton direction
/// is solved in O(K) as `(gradient_k - c) / h_k` with a scalar `c`. Every
/// exit path leaves `alpha` strictly positive: a step that cannot be made
/// safe within the decay cap is dropped and the previous `alpha` stands.
pub(crate) fn update_alpha(
    alpha: &mut Array1<f64>,
    ss: &Array1<f64>,
    num_docs: usize,
    opts: &NewtonOptions,
) {
    let nd = num_docs as f64;
    let mut decay = 0u32;

    for _ in 0..opts.max_iter {
        let alpha_sum = alpha.sum();
        let psi_sum = math::psi(alpha_sum);
        let gradient = alpha.mapv(|a| nd * (psi_sum - math::psi(a))) + ss;
        // all entries negative for positive alpha
        let hessian = alpha.mapv(|a| -nd * math::trigamma(a));

        if gradient.iter().any(|g| !g.is_finite()) {
            log::warn!("non-finite alpha gradient: {:?}", gradient);
        }

        let z = nd * math::trigamma(alpha_sum);
        let sum_g_h = (&gradient / &hessian).sum();
        let sum_1_h = hessian.mapv(|h| 1.0 / h).sum();
        let c = sum_g_h / (1.0 / z + sum_1_h);

        let mut next = None;
        while next.is_none() {
            let scale = opts.decay_factor.powi(decay as i32);
            let step = (&gradient - c) * scale / &hessian;

            // A step of at least alpha_k would drive that entry non-positive.
            // The negated comparison also traps NaN from a degenerate
            // gradient, which must never reach alpha.
            if step.iter().zip(alpha.iter()).any(|(s, a)| !(s < a)) {
                decay += 1;
                if decay > opts.max_decay {
                    break;
                }
            } else {
                next = Some(&*alpha - &step);
            }
        }

        let Some(next) = next else {
            // backoff exhausted: this EM iteration keeps the previous alpha
            return;
        };

        let mean_change = math::mean_abs_change(alpha, &next);
        alpha.assign(&next);
        log::debug!("alpha: {:?}", alpha);
        if mean_change <= opts.threshold {
            break;
        }
    }
}
