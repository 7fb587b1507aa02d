//! Choice of the rank that runs a kernel and owns its outputs.
//!
//! A kernel is placed where the bytes it reads already live, unless that rank
//! is so busy that moving the inputs is cheaper. Queued work is measured in
//! the cost units of [`Complexity`][super::Complexity], so expensive kernels
//! weigh more heavily against a rank than cheap ones.

/// One input of a kernel as seen by the placement heuristic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSite {
    /// Approximate size of the input in bytes.
    pub bytes: usize,
    /// Ranks that can read the input without a transfer.
    pub holders: Vec<usize>,
}

/// Return the rank minimizing `missing_bytes + load_weight * queued_cost`.
///
/// Ties go to the lowest rank.
pub fn choose_rank(inputs: &[InputSite], queued_cost: &[f64], load_weight: f64)
    -> usize
{
    let score = |r: usize| -> f64 {
        let missing: usize
            = inputs.iter()
            .filter(|site| !site.holders.contains(&r))
            .map(|site| site.bytes)
            .sum();
        missing as f64 + load_weight * queued_cost[r]
    };
    (0..queued_cost.len())
        .map(|r| (r, score(r)))
        .fold(None, |best: Option<(usize, f64)>, (r, s)| {
            match best {
                Some((_, bs)) if bs <= s => best,
                _ => Some((r, s)),
            }
        })
        .map(|(r, _)| r)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_the_data() {
        let inputs = vec![
            InputSite { bytes: 800, holders: vec![2] },
            InputSite { bytes: 100, holders: vec![1] },
        ];
        assert_eq!(choose_rank(&inputs, &[0.0; 3], 1.0), 2);
    }

    #[test]
    fn busy_ranks_shed_work() {
        let inputs = vec![InputSite { bytes: 100, holders: vec![0] }];
        assert_eq!(choose_rank(&inputs, &[0.0, 0.0], 1.0), 0);
        assert_eq!(choose_rank(&inputs, &[500.0, 0.0], 1.0), 1);
        assert_eq!(choose_rank(&inputs, &[500.0, 0.0], 0.0), 0);
    }

    #[test]
    fn no_inputs_goes_to_idle_rank() {
        assert_eq!(choose_rank(&[], &[3.0, 1.0, 1.0], 1.0), 1);
    }
}
