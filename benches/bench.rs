#![feature(test)]
extern crate test;
use pfsa::Checkpoint;
use pfsa::config::{Accumulation, Algorithm, TrainConfig};
use pfsa::observation::Corpus;
use pfsa::trellis::Trellis;
use pfsa::wfsa::{InitialWeights, Topology, Wfsa};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
const SEED: u64 = 1293890;
const STATES: usize = 20;
const SYMBOLS: usize = 4;
const SEQLEN: usize = 500;

fn corpus(rng: &mut Xoshiro256StarStar, num: usize) -> (Wfsa, Corpus) {
    let wfsa = Wfsa::random(STATES, SYMBOLS, Topology::Ergodic, InitialWeights::Random, rng);
    let seqs: Vec<_> = pfsa::gen_seq::generate_many(&wfsa, rng, num, SEQLEN)
        .unwrap()
        .into_iter()
        .map(|s| s.symbols)
        .collect();
    let mut corpus = Corpus::from_sequences(seqs);
    corpus.sort_and_dedup();
    (wfsa, corpus)
}

#[bench]
fn forward(b: &mut test::Bencher) {
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(SEED);
    let (wfsa, corpus) = corpus(&mut rng, 20);
    let mut trellis = Trellis::new(STATES, corpus.max_len());
    b.iter(|| {
        let lk: f64 = corpus
            .iter()
            .map(|obs| trellis.forward(&wfsa, &obs.symbols))
            .sum();
        test::black_box(lk)
    });
}

#[bench]
fn backward(b: &mut test::Bencher) {
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(SEED);
    let (wfsa, corpus) = corpus(&mut rng, 20);
    let mut trellis = Trellis::new(STATES, corpus.max_len());
    b.iter(|| {
        let lk: f64 = corpus
            .iter()
            .map(|obs| trellis.backward(&wfsa, &obs.symbols))
            .sum();
        test::black_box(lk)
    });
}

#[bench]
fn viterbi(b: &mut test::Bencher) {
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(SEED);
    let (wfsa, corpus) = corpus(&mut rng, 20);
    let mut trellis = Trellis::new(STATES, corpus.max_len());
    b.iter(|| {
        let lk: f64 = corpus
            .iter()
            .map(|obs| trellis.viterbi(&wfsa, &obs.symbols))
            .sum();
        test::black_box(lk)
    });
}

#[bench]
fn baum_welch_iteration(b: &mut test::Bencher) {
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(SEED);
    let (wfsa, corpus) = corpus(&mut rng, 20);
    let mut estep =
        pfsa::train::baum_welch::EStep::new(&wfsa, &corpus, 4, Accumulation::PerWorker).unwrap();
    b.iter(|| {
        let mut next = wfsa.clone();
        estep.run(&wfsa, &corpus, None).maximize(&mut next);
        test::black_box(next)
    });
}

#[bench]
fn baum_welch_iteration_locked(b: &mut test::Bencher) {
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(SEED);
    let (wfsa, corpus) = corpus(&mut rng, 20);
    let mut estep =
        pfsa::train::baum_welch::EStep::new(&wfsa, &corpus, 4, Accumulation::SharedLocked)
            .unwrap();
    b.iter(|| {
        let mut next = wfsa.clone();
        estep.run(&wfsa, &corpus, None).maximize(&mut next);
        test::black_box(next)
    });
}

#[bench]
fn gibbs_sweeps(b: &mut test::Bencher) {
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(SEED);
    let (_, corpus) = corpus(&mut rng, 5);
    let mut config = TrainConfig::new(Algorithm::Gibbs);
    config.max_iterations = 10;
    config.gibbs.burnin = 5;
    b.iter(|| {
        let checkpoint = Checkpoint::new();
        let outcome = pfsa::train::gibbs::train(STATES, SYMBOLS, &corpus, &config, &checkpoint);
        test::black_box(outcome)
    });
}
