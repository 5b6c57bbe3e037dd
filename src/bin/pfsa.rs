use clap::{App, Arg, ArgMatches, SubCommand};
use pfsa::config::{Algorithm, Annealing, Restarts, TrainConfig};
use pfsa::decode::Method;
use pfsa::wfsa::{InitialWeights, Topology, WeightFormat, Wfsa};
use pfsa::{Checkpoint, Corpus, PfsaError, Termination};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::io::{BufWriter, Write};
use std::sync::Arc;
#[macro_use]
extern crate log;

fn automaton_args(app: App<'static, 'static>) -> App<'static, 'static> {
    app.arg(
        Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .help("Debug mode"),
    )
    .arg(
        Arg::with_name("fsm")
            .long("fsm")
            .short("f")
            .value_name("FSM")
            .takes_value(true)
            .help(concat!(
                "Automaton file. ",
                "One `source target symbol [weight]` or `state [weight]` per line."
            )),
    )
    .arg(
        Arg::with_name("input_format")
            .long("input-format")
            .takes_value(true)
            .default_value("real")
            .possible_values(&["real", "log2", "ln", "log10", "nlog2", "nln", "nlog10"])
            .help("Weight encoding of the automaton file."),
    )
    .arg(
        Arg::with_name("output_format")
            .long("output-format")
            .takes_value(true)
            .default_value("real")
            .possible_values(&["real", "log2", "ln", "log10", "nlog2", "nln", "nlog10"])
            .help("Weight encoding of the output."),
    )
    .arg(
        Arg::with_name("seed")
            .long("seed")
            .takes_value(true)
            .default_value("32389")
            .help("Seed"),
    )
}

fn corpus_arg(app: App<'static, 'static>) -> App<'static, 'static> {
    app.arg(
        Arg::with_name("corpus")
            .value_name("CORPUS")
            .takes_value(true)
            .help("Sequences, one per line. Read from stdin if omitted."),
    )
}

fn subcommand_train() -> App<'static, 'static> {
    let app = SubCommand::with_name("train")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Train an automaton on a corpus. Output the trained automaton.");
    corpus_arg(automaton_args(app))
        .arg(
            Arg::with_name("init")
                .long("init")
                .takes_value(true)
                .default_value("n")
                .possible_values(&["b", "d", "n"])
                .help("Topology of a random initial automaton. Bakis, deterministic, or ergodic."),
        )
        .arg(
            Arg::with_name("states")
                .long("states")
                .short("s")
                .takes_value(true)
                .default_value("3")
                .help("Number of states of a random initial automaton."),
        )
        .arg(
            Arg::with_name("alphabet")
                .long("alphabet")
                .takes_value(true)
                .help("Alphabet size. Defaults to the largest symbol in the corpus plus one."),
        )
        .arg(
            Arg::with_name("uniform")
                .long("uniform")
                .help("Start from uniform weights instead of random ones."),
        )
        .arg(
            Arg::with_name("algorithm")
                .long("algorithm")
                .short("a")
                .takes_value(true)
                .default_value("bw")
                .possible_values(&["vit", "bw", "dabw", "vb", "vitbw", "gs"])
                .help("Training algorithm."),
        )
        .arg(
            Arg::with_name("max_delta")
                .long("max-delta")
                .takes_value(true)
                .default_value("0.1")
                .help("Stop when the log-likelihood changes less than this."),
        )
        .arg(
            Arg::with_name("max_iterations")
                .long("max-iterations")
                .takes_value(true)
                .default_value("100000")
                .help("Maximum number of iterations (sweeps for gs)."),
        )
        .arg(
            Arg::with_name("pseudocount")
                .long("pseudocount")
                .takes_value(true)
                .help("Pseudocount of vit, Dirichlet alpha of vb, or beta of gs."),
        )
        .arg(
            Arg::with_name("restarts")
                .long("restarts")
                .takes_value(true)
                .value_name("N,ITERATIONS")
                .help("Random restarts before Baum-Welch."),
        )
        .arg(
            Arg::with_name("anneal")
                .long("anneal")
                .takes_value(true)
                .value_name("MIN,MAX,GROWTH")
                .help("Annealing schedule of dabw."),
        )
        .arg(
            Arg::with_name("burnin")
                .long("burnin")
                .takes_value(true)
                .default_value("10000")
                .help("Sweeps discarded before collecting samples."),
        )
        .arg(
            Arg::with_name("lag")
                .long("lag")
                .takes_value(true)
                .default_value("1")
                .help("Sweeps between two samples."),
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .short("t")
                .takes_value(true)
                .default_value("1")
                .help("Number of threads. N, c (all CPUs), c/N, or c-N."),
        )
}

fn subcommand_likelihood() -> App<'static, 'static> {
    let app = SubCommand::with_name("likelihood")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Output the likelihood of each sequence.");
    corpus_arg(automaton_args(app)).arg(method_arg())
}

fn subcommand_decode() -> App<'static, 'static> {
    let app = SubCommand::with_name("decode")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Output the likelihood and the state path of each sequence.");
    corpus_arg(automaton_args(app)).arg(method_arg())
}

fn method_arg() -> Arg<'static, 'static> {
    Arg::with_name("method")
        .long("method")
        .short("m")
        .takes_value(true)
        .default_value("f")
        .possible_values(&["f", "b", "vit"])
        .help("Forward, backward, or Viterbi.")
}

fn subcommand_generate() -> App<'static, 'static> {
    let app = SubCommand::with_name("generate")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Draw random sequences. Output the probability, symbols, and states of each.");
    automaton_args(app)
        .arg(
            Arg::with_name("num")
                .long("num")
                .short("n")
                .takes_value(true)
                .default_value("10")
                .help("Number of sequences."),
        )
        .arg(
            Arg::with_name("max_len")
                .long("max-len")
                .takes_value(true)
                .default_value("1000")
                .help("Longer sequences are redrawn."),
        )
}

fn parse<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<T, PfsaError> {
    let value = matches.value_of(name).unwrap_or_default();
    value
        .parse()
        .map_err(|_| PfsaError::InvalidConfig(format!("--{} {}", name, value)))
}

fn parse_list(value: &str, len: usize) -> Result<Vec<f64>, PfsaError> {
    let invalid = || PfsaError::InvalidConfig(value.to_string());
    let xs = value
        .split(',')
        .map(|x| x.trim().parse().map_err(|_| invalid()))
        .collect::<Result<Vec<f64>, _>>()?;
    if xs.len() == len {
        Ok(xs)
    } else {
        Err(invalid())
    }
}

fn read_corpus(matches: &ArgMatches) -> Result<Corpus, PfsaError> {
    pfsa::io::read_corpus(&matches.value_of("corpus"))
}

// The given automaton, widened to the alphabet of the corpus.
fn read_wfsa(matches: &ArgMatches, min_alphabet: usize) -> Result<Option<Wfsa>, PfsaError> {
    let format: WeightFormat = parse(matches, "input_format")?;
    match matches.value_of("fsm") {
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            pfsa::io::parse_wfsa_sized(&contents, format, 0, min_alphabet).map(Some)
        }
        None => Ok(None),
    }
}

fn required_wfsa(matches: &ArgMatches, min_alphabet: usize) -> Result<Wfsa, PfsaError> {
    read_wfsa(matches, min_alphabet)?
        .ok_or_else(|| PfsaError::InvalidConfig("--fsm is required".to_string()))
}

fn train_config(matches: &ArgMatches) -> Result<TrainConfig, PfsaError> {
    let algorithm: Algorithm = parse(matches, "algorithm")?;
    let mut config = TrainConfig::new(algorithm);
    config.max_delta = parse(matches, "max_delta")?;
    config.max_iterations = parse(matches, "max_iterations")?;
    config.threads = pfsa::config::parse_threads(matches.value_of("threads").unwrap_or("1"))?;
    config.seed = parse(matches, "seed")?;
    config.gibbs.burnin = parse(matches, "burnin")?;
    config.gibbs.lag = parse(matches, "lag")?;
    if matches.is_present("pseudocount") {
        let pseudocount: f64 = parse(matches, "pseudocount")?;
        match algorithm {
            Algorithm::VariationalBayes => config.vb_alpha = pseudocount,
            Algorithm::Gibbs => config.gibbs.beta = pseudocount,
            _ => config.viterbi_pseudocount = pseudocount,
        }
    }
    if let Some(value) = matches.value_of("restarts") {
        let xs = parse_list(value, 2)?;
        config.restarts = Restarts {
            count: xs[0] as usize,
            iterations: xs[1] as usize,
            topology: parse(matches, "init")?,
        };
    }
    if let Some(value) = matches.value_of("anneal") {
        let xs = parse_list(value, 3)?;
        config.annealing = Annealing {
            beta_min: xs[0],
            beta_max: xs[1],
            growth: xs[2],
        };
    }
    config.validate()?;
    Ok(config)
}

fn train(matches: &ArgMatches) -> Result<(), PfsaError> {
    let config = train_config(matches)?;
    let mut corpus = read_corpus(matches)?;
    let total = corpus.total_occurrences();
    corpus.sort_and_dedup();
    debug!("{} sequences, {} distinct", total, corpus.len());
    let alphabet = match matches.value_of("alphabet") {
        Some(_) => parse(matches, "alphabet")?,
        None => corpus.alphabet_size().max(1),
    };
    let wfsa = match read_wfsa(matches, alphabet)? {
        Some(wfsa) => wfsa,
        None => {
            let states: usize = parse(matches, "states")?;
            let topology: Topology = parse(matches, "init")?;
            let weights = if matches.is_present("uniform") {
                InitialWeights::Uniform
            } else {
                InitialWeights::Random
            };
            let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(config.seed);
            Wfsa::random(states, alphabet, topology, weights, &mut rng)
        }
    };
    let checkpoint = Arc::new(Checkpoint::new());
    let handler = checkpoint.clone();
    if let Err(why) = ctrlc::set_handler(move || handler.interrupt()) {
        warn!("Could not set the interrupt handler:{}", why);
    }
    let outcome = pfsa::train(wfsa, &corpus, &config, &checkpoint)?;
    info!(
        "{:?} after {} iterations. Log-likelihood:{:.6}",
        outcome.termination, outcome.iterations, outcome.log_likelihood
    );
    if outcome.termination == Termination::Interrupted {
        warn!("Interrupted. Writing the last complete automaton.");
    }
    let format: WeightFormat = parse(matches, "output_format")?;
    let stdout = std::io::stdout();
    let mut wtr = BufWriter::new(stdout.lock());
    pfsa::io::write_wfsa(&mut wtr, &outcome.wfsa, format)?;
    wtr.flush()?;
    Ok(())
}

fn likelihood(matches: &ArgMatches) -> Result<(), PfsaError> {
    let corpus = read_corpus(matches)?;
    let wfsa = required_wfsa(matches, 0)?;
    let method: Method = parse(matches, "method")?;
    let format: WeightFormat = parse(matches, "output_format")?;
    let stdout = std::io::stdout();
    let mut wtr = BufWriter::new(stdout.lock());
    for lk in pfsa::decode::likelihoods(&wfsa, &corpus, method)? {
        writeln!(wtr, "{}", format.from_log2(lk))?;
    }
    wtr.flush()?;
    Ok(())
}

fn decode(matches: &ArgMatches) -> Result<(), PfsaError> {
    let corpus = read_corpus(matches)?;
    let wfsa = required_wfsa(matches, 0)?;
    let method: Method = parse(matches, "method")?;
    let format: WeightFormat = parse(matches, "output_format")?;
    let stdout = std::io::stdout();
    let mut wtr = BufWriter::new(stdout.lock());
    for decoded in pfsa::decode::decode(&wfsa, &corpus, method)? {
        let path: Vec<_> = decoded
            .path
            .iter()
            .map(|s| s.map_or("-".to_string(), |s| s.to_string()))
            .collect();
        writeln!(wtr, "{}\t{}", format.from_log2(decoded.log_prob), path.join(" "))?;
    }
    wtr.flush()?;
    Ok(())
}

fn generate(matches: &ArgMatches) -> Result<(), PfsaError> {
    let wfsa = required_wfsa(matches, 0)?;
    let num: usize = parse(matches, "num")?;
    let max_len: usize = parse(matches, "max_len")?;
    let seed: u64 = parse(matches, "seed")?;
    let format: WeightFormat = parse(matches, "output_format")?;
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(seed);
    let samples = pfsa::gen_seq::generate_many(&wfsa, &mut rng, num, max_len)?;
    let stdout = std::io::stdout();
    let mut wtr = BufWriter::new(stdout.lock());
    pfsa::io::write_samples(&mut wtr, &samples, format)?;
    wtr.flush()?;
    Ok(())
}

fn main() -> Result<(), PfsaError> {
    let matches = App::new("pfsa")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Train:[CORPUS]->FSM, Likelihood/Decode:[FSM]x[CORPUS], Generate:[FSM]->CORPUS")
        .setting(clap::AppSettings::ArgRequiredElseHelp)
        .subcommand(subcommand_train())
        .subcommand(subcommand_likelihood())
        .subcommand(subcommand_decode())
        .subcommand(subcommand_generate())
        .get_matches();
    if let Some(sub_m) = matches.subcommand().1 {
        let level = match sub_m.occurrences_of("verbose") {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    }
    debug!("Start");
    match matches.subcommand() {
        ("train", Some(sub_m)) => train(sub_m),
        ("likelihood", Some(sub_m)) => likelihood(sub_m),
        ("decode", Some(sub_m)) => decode(sub_m),
        ("generate", Some(sub_m)) => generate(sub_m),
        _ => unreachable!(),
    }
}
