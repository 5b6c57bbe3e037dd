//! Forward, backward, and Viterbi algorithms on a reusable dynamic programming grid.
//!
//! A trellis has one cell per (state, time) with time in `0..=len+1`.
//! Column `len + 1` holds the scores after the final weight is applied.
//! The grid keeps its allocation between sequences, so a worker should
//! create one trellis and feed every sequence it owns through it.
use crate::logspace::{self, log_add, LOGZERO};
use crate::wfsa::Wfsa;

/// A cell of the trellis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub forward: f64,
    pub backward: f64,
    /// Viterbi predecessor. In the last column, `Some(state)` marks the best final state.
    pub backpointer: Option<usize>,
}

const EMPTY: Cell = Cell {
    forward: LOGZERO,
    backward: LOGZERO,
    backpointer: None,
};

#[derive(Debug, Clone)]
pub struct Trellis {
    num_states: usize,
    // Length of the sequence in the last pass.
    len: usize,
    // By accessing [time * num_states + state].
    cells: Vec<Cell>,
}

impl Trellis {
    /// Create a trellis for `num_states` states, with room for sequences up to `max_len`.
    pub fn new(num_states: usize, max_len: usize) -> Self {
        Self {
            num_states,
            len: 0,
            cells: vec![EMPTY; num_states * (max_len + 2)],
        }
    }
    pub fn num_states(&self) -> usize {
        self.num_states
    }
    /// Length of the sequence the trellis currently holds.
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    #[inline]
    pub fn get(&self, state: usize, time: usize) -> &Cell {
        &self.cells[time * self.num_states + state]
    }
    #[inline]
    fn get_mut(&mut self, state: usize, time: usize) -> &mut Cell {
        &mut self.cells[time * self.num_states + state]
    }
    #[inline]
    pub fn forward_at(&self, state: usize, time: usize) -> f64 {
        self.get(state, time).forward
    }
    #[inline]
    pub fn backward_at(&self, state: usize, time: usize) -> f64 {
        self.get(state, time).backward
    }
    // Grow if needed and return the live cells, columns `0..=len+1`.
    // The backward pass keeps the forward scores and vice versa,
    // so both can be read after running the two on the same sequence.
    fn initialize(&mut self, wfsa: &Wfsa, len: usize) -> &mut [Cell] {
        assert_eq!(self.num_states, wfsa.num_states());
        let size = self.num_states * (len + 2);
        if self.cells.len() < size {
            self.cells.resize(size, EMPTY);
        }
        self.len = len;
        &mut self.cells[..size]
    }
    fn clear_forward(&mut self, wfsa: &Wfsa, len: usize) {
        self.initialize(wfsa, len).iter_mut().for_each(|c| {
            c.forward = LOGZERO;
            c.backpointer = None;
        });
    }
    fn clear_backward(&mut self, wfsa: &Wfsa, len: usize) {
        self.initialize(wfsa, len)
            .iter_mut()
            .for_each(|c| c.backward = LOGZERO);
    }
    /// Fill the forward scores and return log2 Pr{xs}.
    /// Return `LOGZERO` if the sequence can not be accepted.
    pub fn forward(&mut self, wfsa: &Wfsa, xs: &[usize]) -> f64 {
        self.clear_forward(wfsa, xs.len());
        let states = self.num_states;
        self.get_mut(0, 0).forward = 0f64;
        for (t, &symbol) in xs.iter().enumerate() {
            for source in 0..states {
                let score = self.forward_at(source, t);
                if logspace::is_zero(score) {
                    continue;
                }
                for (target, &weight) in wfsa.targets(source, symbol).iter().enumerate() {
                    if logspace::is_zero(weight) {
                        continue;
                    }
                    let cell = self.get_mut(target, t + 1);
                    cell.forward = log_add(cell.forward, score + weight);
                }
            }
        }
        let len = xs.len();
        let mut total = LOGZERO;
        for state in 0..states {
            let score = self.forward_at(state, len);
            let halt = wfsa.final_weight(state);
            if logspace::is_zero(score) || logspace::is_zero(halt) {
                continue;
            }
            self.get_mut(state, len + 1).forward = score + halt;
            total = log_add(total, score + halt);
        }
        total
    }
    /// Fill the backward scores and return log2 Pr{xs}.
    pub fn backward(&mut self, wfsa: &Wfsa, xs: &[usize]) -> f64 {
        self.clear_backward(wfsa, xs.len());
        let (states, len) = (self.num_states, xs.len());
        for state in 0..states {
            self.get_mut(state, len + 1).backward = 0f64;
            self.get_mut(state, len).backward = wfsa.final_weight(state);
        }
        for (t, &symbol) in xs.iter().enumerate().rev() {
            for source in 0..states {
                let score = wfsa
                    .targets(source, symbol)
                    .iter()
                    .enumerate()
                    .filter(|(_, w)| !logspace::is_zero(**w))
                    .fold(LOGZERO, |acc, (target, &weight)| {
                        log_add(acc, self.backward_at(target, t + 1) + weight)
                    });
                self.get_mut(source, t).backward = score;
            }
        }
        self.backward_at(0, 0)
    }
    /// Fill the Viterbi scores and backpointers, and return the log2 probability
    /// of the best path. Return `LOGZERO` if there is no accepting path.
    /// On ties, the predecessor found first (the lowest state index) is kept.
    pub fn viterbi(&mut self, wfsa: &Wfsa, xs: &[usize]) -> f64 {
        self.clear_forward(wfsa, xs.len());
        let states = self.num_states;
        self.get_mut(0, 0).forward = 0f64;
        for (t, &symbol) in xs.iter().enumerate() {
            for source in 0..states {
                let score = self.forward_at(source, t);
                if logspace::is_zero(score) {
                    continue;
                }
                for (target, &weight) in wfsa.targets(source, symbol).iter().enumerate() {
                    if logspace::is_zero(weight) {
                        continue;
                    }
                    let cell = self.get_mut(target, t + 1);
                    if cell.forward < score + weight {
                        cell.forward = score + weight;
                        cell.backpointer = Some(source);
                    }
                }
            }
        }
        let len = xs.len();
        let (mut best, mut best_score) = (None, LOGZERO);
        for state in 0..states {
            let score = self.forward_at(state, len);
            let halt = wfsa.final_weight(state);
            if logspace::is_zero(score) || logspace::is_zero(halt) {
                continue;
            }
            self.get_mut(state, len + 1).forward = score + halt;
            if best_score < score + halt {
                best_score = score + halt;
                best = Some(state);
            }
        }
        if let Some(state) = best {
            self.get_mut(state, len + 1).backpointer = Some(state);
        }
        best_score
    }
    /// The best state path of the last `viterbi` call, `len + 1` states starting from state 0.
    /// Return None if the sequence was not accepted.
    pub fn viterbi_path(&self) -> Option<Vec<usize>> {
        let len = self.len;
        let terminal = (0..self.num_states).find_map(|s| self.get(s, len + 1).backpointer)?;
        let mut path = vec![terminal; len + 1];
        for t in (1..=len).rev() {
            path[t - 1] = self.get(path[t], t).backpointer?;
        }
        Some(path)
    }
    /// The state with the largest forward score at each time of the last `forward` call.
    /// The entry for time `len` is taken after the final weight is applied.
    pub fn forward_path(&self) -> Vec<Option<usize>> {
        let len = self.len;
        (0..=len)
            .map(|t| if t == len { len + 1 } else { t })
            .map(|t| self.argmax(t, |c| c.forward))
            .collect()
    }
    /// The state with the largest backward score at each time of the last `backward` call.
    pub fn backward_path(&self) -> Vec<Option<usize>> {
        (0..=self.len)
            .map(|t| self.argmax(t, |c| c.backward))
            .collect()
    }
    // Ties go to the lowest index. None if the whole column is zero.
    fn argmax<F: Fn(&Cell) -> f64>(&self, time: usize, score: F) -> Option<usize> {
        let mut best = None;
        let mut best_score = LOGZERO;
        for state in 0..self.num_states {
            let s = score(self.get(state, time));
            if best_score < s {
                best_score = s;
                best = Some(state);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wfsa::{InitialWeights, Topology};
    use rand::Rng;
    use rand::SeedableRng;
    use rand_xoshiro::Xoroshiro128PlusPlus;
    fn one_state() -> Wfsa {
        let mut wfsa = Wfsa::new(1, 1);
        wfsa.set_transition(0, 0, 0, -1f64);
        wfsa.set_final(0, -1f64);
        wfsa
    }
    #[test]
    fn quarter() {
        let wfsa = one_state();
        let mut trellis = Trellis::new(1, 1);
        let fw = trellis.forward(&wfsa, &[0]);
        let bw = trellis.backward(&wfsa, &[0]);
        let vit = trellis.viterbi(&wfsa, &[0]);
        for x in [fw, bw, vit] {
            assert!((x + 2f64).abs() < 1e-12, "{}", x);
        }
        assert_eq!(trellis.viterbi_path(), Some(vec![0, 0]));
    }
    #[test]
    fn empty_sequence() {
        let wfsa = one_state();
        let mut trellis = Trellis::new(1, 0);
        assert!((trellis.forward(&wfsa, &[]) + 1f64).abs() < 1e-12);
        assert!((trellis.backward(&wfsa, &[]) + 1f64).abs() < 1e-12);
        assert!((trellis.viterbi(&wfsa, &[]) + 1f64).abs() < 1e-12);
        assert_eq!(trellis.viterbi_path(), Some(vec![0]));
    }
    #[test]
    fn unreachable() {
        let mut wfsa = Wfsa::new(2, 2);
        wfsa.set_transition(0, 0, 1, -1f64);
        wfsa.set_final(0, -1f64);
        wfsa.set_final(1, 0f64);
        let mut trellis = Trellis::new(2, 2);
        assert!(logspace::is_zero(trellis.forward(&wfsa, &[1])));
        assert!(logspace::is_zero(trellis.backward(&wfsa, &[1])));
        assert!(logspace::is_zero(trellis.viterbi(&wfsa, &[1])));
        assert!(trellis.viterbi_path().is_none());
        assert!((trellis.viterbi(&wfsa, &[0]) + 1f64).abs() < 1e-12);
        assert_eq!(trellis.viterbi_path(), Some(vec![0, 1]));
    }
    #[test]
    fn forward_backward_test() {
        let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(4329);
        for seed in 0..20 {
            let states = 1 + seed % 5;
            let symbols = 1 + seed % 3;
            let wfsa = Wfsa::random(
                states,
                symbols,
                Topology::Ergodic,
                InitialWeights::Random,
                &mut rng,
            );
            let mut trellis = Trellis::new(states, 10);
            for _ in 0..20 {
                let len = rng.gen_range(0..30);
                let xs: Vec<_> = (0..len).map(|_| rng.gen_range(0..symbols)).collect();
                let fw = trellis.forward(&wfsa, &xs);
                let bw = trellis.backward(&wfsa, &xs);
                let vit = trellis.viterbi(&wfsa, &xs);
                assert!((fw - bw).abs() < 1e-6, "{},{}", fw, bw);
                assert!(vit <= fw + 1e-9, "{},{}", vit, fw);
                let path = trellis.viterbi_path().unwrap();
                assert_eq!(path.len(), len + 1);
                assert_eq!(path[0], 0);
                // The path scores exactly the Viterbi score.
                let mut score = wfsa.final_weight(path[len]);
                for (t, &x) in xs.iter().enumerate() {
                    score += wfsa.transition(path[t], x, path[t + 1]);
                }
                assert!((score - vit).abs() < 1e-9, "{},{}", score, vit);
            }
        }
    }
    #[test]
    fn viterbi_tie_keeps_first() {
        // Two equally good paths, through state 1 or state 2.
        let mut wfsa = Wfsa::new(3, 1);
        wfsa.set_transition(0, 0, 1, -1f64);
        wfsa.set_transition(0, 0, 2, -1f64);
        wfsa.set_transition(1, 0, 0, -1f64);
        wfsa.set_transition(2, 0, 0, -1f64);
        wfsa.set_final(0, 0f64);
        let mut trellis = Trellis::new(3, 2);
        trellis.viterbi(&wfsa, &[0, 0]);
        assert_eq!(trellis.viterbi_path(), Some(vec![0, 1, 0]));
    }
    #[test]
    fn decoders() {
        let mut wfsa = Wfsa::new(2, 2);
        wfsa.set_transition(0, 0, 1, -0.5f64);
        wfsa.set_transition(0, 0, 0, -2f64);
        wfsa.set_transition(1, 1, 1, -1f64);
        wfsa.set_final(0, -3f64);
        wfsa.set_final(1, -1f64);
        let mut trellis = Trellis::new(2, 3);
        trellis.forward(&wfsa, &[0, 1, 1]);
        assert_eq!(trellis.forward_path(), vec![Some(0), Some(1), Some(1), Some(1)]);
        trellis.backward(&wfsa, &[0, 1, 1]);
        let path = trellis.backward_path();
        assert_eq!(path.len(), 4);
        assert_eq!(path[0], Some(0));
        assert_eq!(path[3], Some(1));
    }
}
