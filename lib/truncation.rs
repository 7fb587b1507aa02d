//! Bond-dimension control shared by every truncating decomposition.
//!
//! Truncation is *global*: singular values from every symmetry sector are
//! ranked together. A value `σ` is discarded when `σ / σ_max <= cutoff`,
//! after which at most `max_bond_dim` of the largest survivors are kept.
//! At least one value is always kept, so a truncation never produces an
//! empty bond.

use serde::{ Deserialize, Serialize };

/// Parameters controlling a truncation.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TruncationParams {
    /// Maximum number of kept values, summed over all sectors.
    pub max_bond_dim: usize,
    /// Relative cutoff on singular values.
    pub cutoff: f64,
}

impl Default for TruncationParams {
    fn default() -> Self {
        Self { max_bond_dim: usize::MAX, cutoff: 0.0 }
    }
}

impl TruncationParams {
    /// Create new truncation parameters.
    pub fn new(max_bond_dim: usize, cutoff: f64) -> Self {
        Self { max_bond_dim, cutoff }
    }

    /// Parameters that only discard exact zeros.
    pub fn exact() -> Self { Self::default() }

    /// Set the maximum bond dimension.
    pub fn with_max_bond_dim(mut self, max_bond_dim: usize) -> Self {
        self.max_bond_dim = max_bond_dim;
        self
    }

    /// Set the relative cutoff.
    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff;
        self
    }
}

/// Statistics of a completed truncation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TruncationResults {
    /// Number of kept values over all sectors.
    pub bond_dimension: usize,
    /// Sum of squares of discarded values relative to the sum of squares of
    /// all values.
    pub discarded_weight: f64,
    /// Smallest kept value.
    pub smallest_kept: f64,
}

/// Decide how many values to keep in each sector.
///
/// `spectra[k]` holds the singular values of sector `k` in descending
/// order. Returns the number of leading values kept per sector alongside
/// the truncation statistics.
pub fn select(spectra: &[Vec<f64>], params: TruncationParams)
    -> (Vec<usize>, TruncationResults)
{
    let mut ranked: Vec<(f64, usize, usize)>
        = spectra.iter().enumerate()
        .flat_map(|(k, s)| s.iter().enumerate().map(move |(j, x)| (*x, k, j)))
        .collect();
    if ranked.is_empty() {
        return (vec![0; spectra.len()], TruncationResults::default());
    }
    ranked.sort_by(|l, r| {
        r.0.total_cmp(&l.0).then(l.1.cmp(&r.1)).then(l.2.cmp(&r.2))
    });
    let smax = ranked[0].0;
    let total: f64 = ranked.iter().map(|(x, ..)| x * x).sum();
    let above_cutoff
        = ranked.iter()
        .take_while(|(x, ..)| smax > 0.0 && *x / smax > params.cutoff)
        .count();
    let nkeep = above_cutoff.min(params.max_bond_dim).max(1);

    let mut keep = vec![0; spectra.len()];
    ranked[..nkeep].iter().for_each(|(_, k, _)| { keep[*k] += 1; });
    let discarded: f64 = ranked[nkeep..].iter().map(|(x, ..)| x * x).sum();
    let results = TruncationResults {
        bond_dimension: nkeep,
        discarded_weight: if total > 0.0 { discarded / total } else { 0.0 },
        smallest_kept: ranked[nkeep - 1].0,
    };
    if results.discarded_weight > 0.5 {
        log::warn!(
            discarded_weight = results.discarded_weight,
            bond_dimension = nkeep;
            "truncation discarded most of the weight"
        );
    }
    (keep, results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn spectra() -> Vec<Vec<f64>> {
        vec![vec![1.0, 0.3, 0.01], vec![0.5, 0.2], vec![0.05]]
    }

    #[test]
    fn cap_keeps_largest_globally() {
        let (keep, res) = select(&spectra(), TruncationParams::new(3, 0.0));
        assert_eq!(keep, vec![2, 1, 0]);
        assert_eq!(res.bond_dimension, 3);
        assert_abs_diff_eq!(res.smallest_kept, 0.3);
        let total = 1.0 + 0.09 + 0.0001 + 0.25 + 0.04 + 0.0025;
        assert_abs_diff_eq!(
            res.discarded_weight, (0.0001 + 0.04 + 0.0025) / total,
            epsilon = 1e-14);
    }

    #[test]
    fn cutoff_is_relative_to_largest() {
        let (keep, res) = select(&spectra(), TruncationParams::new(100, 0.1));
        assert_eq!(keep, vec![2, 2, 0]);
        assert_eq!(res.bond_dimension, 4);
    }

    #[test]
    fn keeps_at_least_one() {
        let (keep, res) = select(&spectra(), TruncationParams::new(0, 0.0));
        assert_eq!(keep, vec![1, 0, 0]);
        assert_eq!(res.bond_dimension, 1);
        let (keep, _) = select(&[vec![0.0, 0.0]], TruncationParams::exact());
        assert_eq!(keep, vec![1]);
    }

    #[test]
    fn discarded_weight_is_monotone_in_cap() {
        let s = spectra();
        let weights: Vec<f64>
            = (1..=6)
            .map(|m| select(&s, TruncationParams::new(m, 0.0)).1.discarded_weight)
            .collect();
        assert!(weights.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(weights[5], 0.0);
    }
}
