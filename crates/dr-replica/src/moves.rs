//! The four replica-move algorithms (spec.md §4.4): Metropolis Monte
//! Carlo / vRE on the DRPE, discrete Boltzmann jumping, and continuous
//! Boltzmann jumping.
//!
//! Every function here is pure: given the inputs a session already has
//! in hand (the wire energy, the current configuration, the nominal
//! grid), it returns a decision. No function touches a socket, a lock,
//! or the clock — that plumbing lives in `dr-server`.
//!
//! A note on notation: spec.md §4.4 reuses the symbol `β` for two
//! different things — the thermodynamic `1/(k_B T)` and the DRPE's
//! second `POTENTIALSCALAR` weight. This module keeps them as distinct
//! parameters (`beta_kt` and the DRPE's own `alpha`/`beta` pair) rather
//! than one overloaded name.

use rand::Rng;

use dr_types::REPLICA_MICRODIVISIONS;

use crate::drpe::{bin_of, drpe_of_configuration};

/// `exp(-ΔE) > U(0,1)`. For `ΔE <= 0` this always accepts, since
/// `exp(-ΔE) >= 1` and the uniform draw is strictly less than 1.
pub fn accept_metropolis(delta_e: f64, rng: &mut impl Rng) -> bool {
    let p = (-delta_e).exp();
    p > rng.gen::<f64>()
}

/// A Monte-Carlo proposal for a non-Spatial coordinate: a uniform draw in
/// `[-step, step]` around `w_old`, where `step` is `REPLICASTEP` times the
/// local nominal gap. Spatial proposals come from the wire instead of
/// this function.
pub fn mc_proposal(w_old: f64, nominal_gap: f64, step_fraction: f64, rng: &mut impl Rng) -> f64 {
    let step = nominal_gap * step_fraction;
    w_old + rng.gen_range(-step..=step)
}

/// True if `w_new`'s bin lies within the suspension fence
/// `[min_running, max_running]` (spec.md §4.4). A proposal failing this
/// check is rejected outright, with `w_old` restored.
pub fn within_running_fence(nominals: &[f64], w_new: f64, min_running: usize, max_running: usize) -> bool {
    let bin = bin_of(nominals, w_new);
    bin >= min_running && bin <= max_running
}

/// Inputs shared by every Metropolis-family coordinate-energy
/// computation: the DRPE weights and the before/after configuration.
pub struct DrpeDelta {
    pub before: f64,
    pub after: f64,
}

impl DrpeDelta {
    pub fn compute(alpha: f64, beta: f64, nominals: &[f64], positions_before: &[f64], positions_after: &[f64]) -> Self {
        DrpeDelta {
            before: drpe_of_configuration(alpha, beta, nominals, positions_before),
            after: drpe_of_configuration(alpha, beta, nominals, positions_after),
        }
    }

    pub fn delta(&self) -> f64 {
        self.after - self.before
    }
}

/// `ΔE` for a Spatial-coordinate Metropolis move: the client-reported
/// system energy change and the cancellation delta at the new/old bins,
/// both scaled by `beta_kt`, plus the (already appropriately scaled)
/// `ΔDRPE`.
pub fn spatial_delta_e(beta_kt: f64, system_delta_e: f64, cancellation_delta: f64, drpe_delta: f64) -> f64 {
    beta_kt * (system_delta_e + cancellation_delta) + drpe_delta
}

/// `ΔE` for a Temperature-coordinate move. `virtual_reverse` is the vRE
/// cancellation contribution popped from the vRE store, zero otherwise.
#[allow(clippy::too_many_arguments)]
pub fn temperature_delta_e(
    w_old: f64,
    w_new: f64,
    e_system: f64,
    virtual_reverse: f64,
    canc_old: f64,
    canc_new: f64,
    drpe_delta: f64,
) -> f64 {
    (w_new - w_old) * e_system + virtual_reverse + (w_old * canc_old - w_new * canc_new) + drpe_delta
}

/// `ΔE` for an Umbrella-coordinate move. `circular` carries the periodic
/// identification distance, if the coordinate is `CIRCULAR`; the nearest
/// periodic image of `x` relative to both `w_old` and `w_new` is used.
#[allow(clippy::too_many_arguments)]
pub fn umbrella_delta_e(
    beta_kt: f64,
    k_old: f64,
    k_new: f64,
    x: f64,
    w_old: f64,
    w_new: f64,
    cancellation_delta: f64,
    drpe_delta: f64,
    circular_distance: Option<f64>,
) -> f64 {
    let nearest_image = |center: f64| match circular_distance {
        Some(d) if d > 0.0 => {
            let mut delta = x - center;
            delta -= d * (delta / d).round();
            center + delta
        }
        _ => x,
    };
    let x_rel_new = nearest_image(w_new);
    let x_rel_old = nearest_image(w_old);
    let kinetic = 0.5 * (k_new * (x_rel_new - w_new).powi(2) - k_old * (x_rel_old - w_old).powi(2));
    beta_kt * (kinetic + cancellation_delta + drpe_delta)
}

/// One candidate bin and its (unnormalized, pre-exponentiated)
/// dimensionless energy, for discrete or continuous Boltzmann jumping.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub bin: usize,
    pub energy: f64,
}

/// Builds the normalized selection distribution for discrete Boltzmann
/// jumping: bins outside `[min_running, max_running]` are excluded
/// (treated as `+∞` energy), the minimum energy is subtracted for
/// numerical stability, and the result is exponentiated and normalized.
/// Returns `(bin, cumulative_probability)` pairs in bin order, suitable
/// for inverse-CDF sampling.
pub fn discrete_boltzmann_distribution(
    candidates: &[Candidate],
    min_running: usize,
    max_running: usize,
) -> Vec<(usize, f64)> {
    let eligible: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.bin >= min_running && c.bin <= max_running)
        .collect();
    if eligible.is_empty() {
        return Vec::new();
    }
    let min_energy = eligible.iter().map(|c| c.energy).fold(f64::INFINITY, f64::min);
    let weights: Vec<f64> = eligible.iter().map(|c| (-(c.energy - min_energy)).exp()).collect();
    let total: f64 = weights.iter().sum();
    let mut cumulative = 0.0;
    eligible
        .iter()
        .zip(weights.iter())
        .map(|(c, &w)| {
            cumulative += w / total;
            (c.bin, cumulative)
        })
        .collect()
}

/// Samples a bin from a distribution built by
/// [`discrete_boltzmann_distribution`]. Returns `None` if there were no
/// eligible candidates.
pub fn sample_discrete_boltzmann(distribution: &[(usize, f64)], rng: &mut impl Rng) -> Option<usize> {
    let draw: f64 = rng.gen();
    distribution
        .iter()
        .find(|&&(_, cumulative)| draw <= cumulative)
        .map(|&(bin, _)| bin)
        .or_else(|| distribution.last().map(|&(bin, _)| bin))
}

/// One subdivision point used by continuous Boltzmann jumping: the exact
/// coordinate, and the (linearly interpolated) dimensionless energy
/// there.
#[derive(Debug, Clone, Copy)]
pub struct Microdivision {
    pub w: f64,
    pub energy: f64,
}

/// Subdivides the segment between two neighboring nominals into
/// [`REPLICA_MICRODIVISIONS`] points and linearly interpolates the
/// cancellation energy between the segment's endpoint energies
/// (spec.md §4.4, Temperature/Umbrella only).
pub fn subdivide_segment(w_lo: f64, w_hi: f64, energy_lo: f64, energy_hi: f64) -> Vec<Microdivision> {
    let n = REPLICA_MICRODIVISIONS;
    (0..n)
        .map(|i| {
            let t = i as f64 / (n - 1) as f64;
            Microdivision {
                w: w_lo + t * (w_hi - w_lo),
                energy: energy_lo + t * (energy_hi - energy_lo),
            }
        })
        .collect()
}

/// Builds a piecewise-linear PDF over consecutive microdivisions via the
/// trapezoidal rule, normalizes it, and returns the cumulative
/// probability at each point — the table an inverse-CDF sampler walks to
/// locate first the segment, then (via
/// [`solve_position_in_segment`]) the exact position inside it.
pub fn continuous_boltzmann_cdf(points: &[Microdivision]) -> Vec<f64> {
    if points.len() < 2 {
        return vec![1.0; points.len()];
    }
    let min_energy = points.iter().map(|p| p.energy).fold(f64::INFINITY, f64::min);
    let density: Vec<f64> = points.iter().map(|p| (-(p.energy - min_energy)).exp()).collect();
    let mut areas = Vec::with_capacity(points.len() - 1);
    for i in 0..points.len() - 1 {
        let dw = points[i + 1].w - points[i].w;
        areas.push(0.5 * (density[i] + density[i + 1]) * dw);
    }
    let total: f64 = areas.iter().sum();
    let mut cdf = Vec::with_capacity(points.len());
    cdf.push(0.0);
    let mut running = 0.0;
    for area in areas {
        running += area / total;
        cdf.push(running);
    }
    cdf
}

/// Given the draw landed between microdivisions `i` and `i+1` (a
/// trapezoid with densities `d_i`, `d_{i+1}`), solves the quadratic for
/// the exact position whose cumulative area under the linear density
/// matches the residual probability `target_area`.
pub fn solve_position_in_segment(w_i: f64, w_next: f64, d_i: f64, d_next: f64, target_area: f64) -> f64 {
    let dw = w_next - w_i;
    if (d_next - d_i).abs() < 1e-12 {
        if d_i <= 0.0 {
            return w_i;
        }
        return w_i + target_area / d_i;
    }
    let slope = (d_next - d_i) / dw;
    // Solve 0.5*slope*t^2 + d_i*t - target_area = 0 for t in [0, dw].
    let a = 0.5 * slope;
    let b = d_i;
    let c = -target_area;
    let disc = (b * b - 4.0 * a * c).max(0.0).sqrt();
    let t1 = (-b + disc) / (2.0 * a);
    let t2 = (-b - disc) / (2.0 * a);
    let t = [t1, t2].into_iter().find(|&t| (0.0..=dw).contains(&t)).unwrap_or(0.0);
    w_i + t
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn metropolis_always_accepts_non_positive_delta_e() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..1000 {
            assert!(accept_metropolis(0.0, &mut rng));
            assert!(accept_metropolis(-3.0, &mut rng));
        }
    }

    #[test]
    fn metropolis_rarely_accepts_large_positive_delta_e() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let accepted = (0..10_000).filter(|_| accept_metropolis(20.0, &mut rng)).count();
        assert!(accepted < 5);
    }

    #[test]
    fn discrete_distribution_excludes_bins_outside_the_fence() {
        let candidates = vec![
            Candidate { bin: 0, energy: 0.0 },
            Candidate { bin: 1, energy: 0.0 },
            Candidate { bin: 2, energy: 0.0 },
        ];
        let dist = discrete_boltzmann_distribution(&candidates, 1, 2);
        assert_eq!(dist.len(), 2);
        assert!(dist.iter().all(|&(bin, _)| bin != 0));
    }

    #[test]
    fn discrete_distribution_with_equal_energies_samples_uniformly_in_expectation() {
        let candidates: Vec<Candidate> = (0..3).map(|bin| Candidate { bin, energy: 1.0 }).collect();
        let dist = discrete_boltzmann_distribution(&candidates, 0, 2);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut counts = [0u32; 3];
        for _ in 0..30_000 {
            let bin = sample_discrete_boltzmann(&dist, &mut rng).unwrap();
            counts[bin] += 1;
        }
        for &c in &counts {
            let frac = c as f64 / 30_000.0;
            assert!((frac - 1.0 / 3.0).abs() < 0.02, "frac={frac}");
        }
    }

    #[test]
    fn continuous_cdf_is_monotone_and_ends_at_one() {
        let lo = Microdivision { w: 0.0, energy: 1.0 };
        let hi = Microdivision { w: 1.0, energy: 1.0 };
        let points = subdivide_segment(lo.w, hi.w, lo.energy, hi.energy);
        let cdf = continuous_boltzmann_cdf(&points);
        assert!(cdf.windows(2).all(|w| w[1] >= w[0]));
        assert!((*cdf.last().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn within_running_fence_rejects_outside_bins() {
        let nominals = vec![0.0, 1.0, 2.0, 3.0];
        assert!(!within_running_fence(&nominals, 0.0, 1, 3));
        assert!(within_running_fence(&nominals, 1.0, 1, 3));
    }
}
