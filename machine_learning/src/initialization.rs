use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::error::{MlErr, Result};

/// Fills a parameter buffer using Xavier uniform initialization for the weights and zeros for the
/// biases.
///
/// # Arguments
/// * `shapes` - The (fan in, fan out, size) of each layer, in the buffer's order.
/// * `rng` - The random number generator to sample from.
///
/// # Returns
/// The initialized parameters, or an error if a layer has no units.
pub fn xavier_uniform<R: Rng>(
    shapes: impl Iterator<Item = (usize, usize, usize)>,
    rng: &mut R,
) -> Result<Vec<f32>> {
    let mut params = Vec::new();

    for (fan_in, fan_out, size) in shapes {
        let range = (6. / (fan_in + fan_out) as f32).sqrt();
        let dist = Uniform::new(-range, range).map_err(|e| MlErr::InvalidSpec(e.to_string()))?;

        let weights = size - fan_out;
        params.extend((0..weights).map(|_| dist.sample(rng)));
        params.extend(std::iter::repeat_n(0.0, fan_out));
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn weights_stay_in_range_and_biases_start_at_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        let params = xavier_uniform([(4, 2, 10)].into_iter(), &mut rng).unwrap();

        let range = 1.0f32;
        assert_eq!(params.len(), 10);
        assert!(params[..8].iter().all(|w| w.abs() <= range));
        assert_eq!(&params[8..], &[0.0, 0.0]);
    }
}
