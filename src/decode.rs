//! Scoring and decoding of every sequence in a corpus.
use crate::error::{PfsaError, Result};
use crate::observation::Corpus;
use crate::train::check_alphabet;
use crate::trellis::Trellis;
use crate::wfsa::Wfsa;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Forward,
    Backward,
    Viterbi,
}

impl std::str::FromStr for Method {
    type Err = PfsaError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "f" | "forward" => Ok(Method::Forward),
            "b" | "backward" => Ok(Method::Backward),
            "v" | "vit" | "viterbi" => Ok(Method::Viterbi),
            _ => Err(PfsaError::UnknownAlgorithm(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// log2 score of the sequence. `LOGZERO` if it is not accepted.
    pub log_prob: f64,
    /// One state per time `0..=len`. With [`Method::Viterbi`] this is the best path,
    /// otherwise the most likely state at each time.
    pub path: Vec<Option<usize>>,
}

fn score(trellis: &mut Trellis, wfsa: &Wfsa, xs: &[usize], method: Method) -> f64 {
    match method {
        Method::Forward => trellis.forward(wfsa, xs),
        Method::Backward => trellis.backward(wfsa, xs),
        Method::Viterbi => trellis.viterbi(wfsa, xs),
    }
}

/// log2 score of each sequence, in corpus order. Occurrences are not applied.
pub fn likelihoods(wfsa: &Wfsa, corpus: &Corpus, method: Method) -> Result<Vec<f64>> {
    check_alphabet(wfsa, corpus)?;
    let mut trellis = Trellis::new(wfsa.num_states(), corpus.max_len());
    Ok(corpus
        .iter()
        .map(|obs| score(&mut trellis, wfsa, &obs.symbols, method))
        .collect())
}

pub fn decode(wfsa: &Wfsa, corpus: &Corpus, method: Method) -> Result<Vec<Decoded>> {
    check_alphabet(wfsa, corpus)?;
    let mut trellis = Trellis::new(wfsa.num_states(), corpus.max_len());
    let decoded = corpus
        .iter()
        .map(|obs| {
            let log_prob = score(&mut trellis, wfsa, &obs.symbols, method);
            let path = match method {
                Method::Forward => trellis.forward_path(),
                Method::Backward => trellis.backward_path(),
                Method::Viterbi => match trellis.viterbi_path() {
                    Some(path) => path.into_iter().map(Some).collect(),
                    None => vec![None; obs.len() + 1],
                },
            };
            Decoded { log_prob, path }
        })
        .collect();
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logspace;
    fn alternating() -> Wfsa {
        let mut wfsa = Wfsa::new(2, 2);
        wfsa.set_transition(0, 0, 1, 0.8f64.log2());
        wfsa.set_final(0, 0.2f64.log2());
        wfsa.set_transition(1, 1, 0, 0.6f64.log2());
        wfsa.set_final(1, 0.4f64.log2());
        wfsa
    }
    #[test]
    fn scores_agree() {
        let wfsa = alternating();
        let corpus = Corpus::from_sequences(vec![vec![0, 1, 0], vec![0, 1], vec![], vec![1]]);
        let fwd = likelihoods(&wfsa, &corpus, Method::Forward).unwrap();
        let bwd = likelihoods(&wfsa, &corpus, Method::Backward).unwrap();
        let vit = likelihoods(&wfsa, &corpus, Method::Viterbi).unwrap();
        // 0.8 * 0.6 * 0.8 * 0.4
        let expected = (0.8f64 * 0.6 * 0.8 * 0.4).log2();
        assert!((fwd[0] - expected).abs() < 1e-9, "{},{}", fwd[0], expected);
        for ((f, b), v) in fwd.iter().zip(bwd.iter()).zip(vit.iter()).take(3) {
            assert!((f - b).abs() < 1e-9, "{},{}", f, b);
            assert!((f - v).abs() < 1e-9, "{},{}", f, v);
        }
        assert!(logspace::is_zero(fwd[3]));
        assert!(logspace::is_zero(vit[3]));
    }
    #[test]
    fn decoded_paths() {
        let wfsa = alternating();
        let corpus = Corpus::from_sequences(vec![vec![0, 1, 0], vec![1]]);
        for method in [Method::Forward, Method::Backward, Method::Viterbi] {
            let decoded = decode(&wfsa, &corpus, method).unwrap();
            assert_eq!(decoded[0].path, vec![Some(0), Some(1), Some(0), Some(1)]);
        }
        let decoded = decode(&wfsa, &corpus, Method::Viterbi).unwrap();
        assert_eq!(decoded[1].path, vec![None, None]);
        let decoded = decode(&wfsa, &corpus, Method::Forward).unwrap();
        assert_eq!(decoded[1].path, vec![Some(0), None]);
    }
    #[test]
    fn rejects_large_symbols() {
        let wfsa = alternating();
        let corpus = Corpus::from_sequences(vec![vec![0, 2]]);
        assert!(likelihoods(&wfsa, &corpus, Method::Forward).is_err());
        assert!("x".parse::<Method>().is_err());
        assert_eq!("viterbi".parse::<Method>().unwrap(), Method::Viterbi);
    }
}
