//! Observed symbol sequences.
use std::cmp::Ordering;
use std::ops::Range;

/// A symbol sequence with the number of times it was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub symbols: Vec<usize>,
    pub occurrences: usize,
}

impl Observation {
    pub fn new(symbols: Vec<usize>) -> Self {
        Self {
            symbols,
            occurrences: 1,
        }
    }
    pub fn len(&self) -> usize {
        self.symbols.len()
    }
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Elementwise order on symbols. If one sequence is a prefix of the other,
/// the longer one comes first.
pub fn compare(xs: &[usize], ys: &[usize]) -> Ordering {
    match xs.iter().zip(ys.iter()).map(|(x, y)| x.cmp(y)).find(|o| o.is_ne()) {
        Some(ord) => ord,
        None => ys.len().cmp(&xs.len()),
    }
}

/// A multiset of observations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    observations: Vec<Observation>,
}

impl Corpus {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }
    pub fn from_sequences<I: IntoIterator<Item = Vec<usize>>>(seqs: I) -> Self {
        let observations = seqs.into_iter().map(Observation::new).collect();
        Self { observations }
    }
    pub fn len(&self) -> usize {
        self.observations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
    pub fn as_slice(&self) -> &[Observation] {
        &self.observations
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }
    /// Each sequence, repeated as many times as it was observed.
    pub fn expanded(&self) -> impl Iterator<Item = &[usize]> + '_ {
        self.observations
            .iter()
            .flat_map(|obs| std::iter::repeat(obs.symbols.as_slice()).take(obs.occurrences))
    }
    /// The largest symbol plus one. Zero for a corpus without any symbol.
    pub fn alphabet_size(&self) -> usize {
        self.observations
            .iter()
            .filter_map(|obs| obs.symbols.iter().max())
            .max()
            .map_or(0, |&max| max + 1)
    }
    pub fn max_len(&self) -> usize {
        self.observations.iter().map(|obs| obs.len()).max().unwrap_or(0)
    }
    pub fn total_occurrences(&self) -> usize {
        self.observations.iter().map(|obs| obs.occurrences).sum()
    }
    pub fn sort(&mut self) {
        self.observations.sort_by(|x, y| compare(&x.symbols, &y.symbols));
    }
    /// Merge adjacent identical sequences, summing their occurrences.
    pub fn dedup(&mut self) {
        let mut merged: Vec<Observation> = Vec::with_capacity(self.observations.len());
        for obs in std::mem::take(&mut self.observations) {
            match merged.last_mut() {
                Some(last) if last.symbols == obs.symbols => last.occurrences += obs.occurrences,
                _ => merged.push(obs),
            }
        }
        self.observations = merged;
    }
    pub fn sort_and_dedup(&mut self) {
        self.sort();
        self.dedup();
    }
    /// Split the observations into at most `workers` contiguous ranges.
    /// Each range gets `len / workers` items, and the first `len % workers` ranges
    /// get one more. Always returns at least one range.
    pub fn partition(&self, workers: usize) -> Vec<Range<usize>> {
        partition(self.observations.len(), workers)
    }
}

pub fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    let shards = workers.min(len).max(1);
    let (base, rem) = (len / shards, len % shards);
    let mut start = 0;
    (0..shards)
        .map(|i| {
            let size = base + (i < rem) as usize;
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}
