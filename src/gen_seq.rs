//! This module is to draw random sequences from an automaton.
//! It is mainly used to make corpora with a known generating model.
use crate::error::Result;
use crate::wfsa::Wfsa;

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// log2 probability of the path taken, including the final weight.
    pub log_prob: f64,
    pub symbols: Vec<usize>,
    /// Visited states, starting from state 0. One more than `symbols`.
    pub states: Vec<usize>,
}

/// Walk from state 0 until the automaton halts.
/// A walk longer than `max_len` symbols is thrown away and started again,
/// so an automaton that can not halt within `max_len` never returns.
pub fn generate<R: rand::Rng>(wfsa: &Wfsa, rng: &mut R, max_len: usize) -> Result<Sample> {
    'redraw: loop {
        let mut sample = Sample {
            log_prob: 0f64,
            symbols: vec![],
            states: vec![0],
        };
        let mut state = 0;
        loop {
            let step = wfsa.random_transition(state, rng)?;
            sample.log_prob += step.weight;
            match step.symbol {
                None => return Ok(sample),
                Some(_) if sample.symbols.len() == max_len => {
                    trace!("Redraw a sequence longer than {}", max_len);
                    continue 'redraw;
                }
                Some(symbol) => {
                    sample.symbols.push(symbol);
                    sample.states.push(step.target);
                    state = step.target;
                }
            }
        }
    }
}

pub fn generate_many<R: rand::Rng>(
    wfsa: &Wfsa,
    rng: &mut R,
    n: usize,
    max_len: usize,
) -> Result<Vec<Sample>> {
    (0..n).map(|_| generate(wfsa, rng, max_len)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PfsaError;
    use crate::trellis::Trellis;
    use rand::SeedableRng;
    use rand_xoshiro::Xoroshiro128PlusPlus;
    fn alternating() -> Wfsa {
        let mut wfsa = Wfsa::new(2, 2);
        wfsa.set_transition(0, 0, 1, 0.8f64.log2());
        wfsa.set_final(0, 0.2f64.log2());
        wfsa.set_transition(1, 1, 0, 0f64);
        wfsa
    }
    #[test]
    fn samples_follow_automaton() {
        let wfsa = alternating();
        let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(42);
        let samples = generate_many(&wfsa, &mut rng, 500, 100).unwrap();
        let mut trellis = Trellis::new(2, 100);
        for sample in samples.iter() {
            assert_eq!(sample.states.len(), sample.symbols.len() + 1);
            assert_eq!(sample.symbols.len() % 2, 0);
            assert!(sample.symbols.chunks(2).all(|xs| xs == [0, 1]));
            // Only one path, so the path probability is the likelihood.
            let score = trellis.forward(&wfsa, &sample.symbols);
            assert!((score - sample.log_prob).abs() < 1e-9, "{},{}", score, sample.log_prob);
        }
        let empty = samples.iter().filter(|s| s.symbols.is_empty()).count();
        let frac = empty as f64 / samples.len() as f64;
        assert!((frac - 0.2).abs() < 0.05, "{}", frac);
    }
    #[test]
    fn long_samples_are_redrawn() {
        let wfsa = alternating();
        let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(43);
        for _ in 0..200 {
            let sample = generate(&wfsa, &mut rng, 4).unwrap();
            assert!(sample.symbols.len() <= 4);
        }
    }
    #[test]
    fn dead_state_is_error() {
        let mut wfsa = Wfsa::new(2, 1);
        wfsa.set_transition(0, 0, 1, 0f64);
        let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(44);
        match generate(&wfsa, &mut rng, 10) {
            Err(PfsaError::NormalizationInconsistency { state, .. }) => assert_eq!(state, 1),
            x => panic!("{:?}", x),
        }
    }
}
