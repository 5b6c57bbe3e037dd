//! Thin readers and writers of the automaton and corpus text formats.
//!
//! An automaton file has one entry per line:
//! `source target symbol [weight]` for a transition, `state [weight]` for a final weight.
//! A corpus file has one sequence per line, symbols separated by anything but digits.
use crate::error::{PfsaError, Result};
use crate::gen_seq::Sample;
use crate::logspace;
use crate::observation::Corpus;
use crate::wfsa::{WeightFormat, Wfsa};
use std::io::{BufRead, BufReader, Read, Write};

enum Entry {
    Transition {
        source: usize,
        target: usize,
        symbol: usize,
        weight: f64,
    },
    Final {
        state: usize,
        weight: f64,
    },
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '.' | '-' | 'e' | 'E')
}

fn parse_id(line: usize, token: &str) -> Result<usize> {
    token.parse().map_err(|_| PfsaError::InvalidNumber {
        line,
        token: token.to_string(),
    })
}

// Omitted weights are probability one.
fn parse_weight(line: usize, token: Option<&&str>, format: WeightFormat) -> Result<f64> {
    match token {
        None => Ok(0f64),
        Some(token) => token
            .parse()
            .map(|x| format.to_log2(x))
            .map_err(|_| PfsaError::InvalidNumber {
                line,
                token: token.to_string(),
            }),
    }
}

fn parse_entry(line: usize, fields: &[&str], format: WeightFormat) -> Result<Entry> {
    match fields.len() {
        1 | 2 => Ok(Entry::Final {
            state: parse_id(line, fields[0])?,
            weight: parse_weight(line, fields.get(1), format)?,
        }),
        3 | 4 => Ok(Entry::Transition {
            source: parse_id(line, fields[0])?,
            target: parse_id(line, fields[1])?,
            symbol: parse_id(line, fields[2])?,
            weight: parse_weight(line, fields.get(3), format)?,
        }),
        fields => Err(PfsaError::MalformedAutomaton { line, fields }),
    }
}

/// Parse an automaton. The number of states (symbols) is the largest id in the text plus one,
/// or `min_states` (`min_alphabet`) if that is larger.
/// Cells without an entry have zero probability.
pub fn parse_wfsa_sized(
    contents: &str,
    format: WeightFormat,
    min_states: usize,
    min_alphabet: usize,
) -> Result<Wfsa> {
    let mut entries = vec![];
    for (i, line) in contents.lines().enumerate() {
        let fields: Vec<_> = line
            .split(|c| !is_number_char(c))
            .filter(|x| !x.is_empty())
            .collect();
        if fields.is_empty() {
            continue;
        }
        entries.push(parse_entry(i + 1, &fields, format)?);
    }
    let (mut states, mut symbols) = (min_states, min_alphabet);
    for entry in entries.iter() {
        match *entry {
            Entry::Transition {
                source,
                target,
                symbol,
                ..
            } => {
                states = states.max(source.max(target) + 1);
                symbols = symbols.max(symbol + 1);
            }
            Entry::Final { state, .. } => states = states.max(state + 1),
        }
    }
    let mut wfsa = Wfsa::new(states, symbols);
    for entry in entries {
        match entry {
            Entry::Transition {
                source,
                target,
                symbol,
                weight,
            } => wfsa.set_transition(source, symbol, target, weight),
            Entry::Final { state, weight } => wfsa.set_final(state, weight),
        }
    }
    Ok(wfsa)
}

pub fn parse_wfsa(contents: &str, format: WeightFormat) -> Result<Wfsa> {
    parse_wfsa_sized(contents, format, 0, 0)
}

/// Write transitions as `source target symbol weight`, then finals as `state weight`.
/// Zero-probability entries are omitted.
pub fn write_wfsa<W: Write>(wtr: &mut W, wfsa: &Wfsa, format: WeightFormat) -> Result<()> {
    let encode = |w: f64| {
        let x = format.from_log2(w);
        let skip = logspace::is_zero(w) || (format == WeightFormat::Real && x <= 0f64);
        (!skip).then_some(x)
    };
    for source in 0..wfsa.num_states() {
        for target in 0..wfsa.num_states() {
            for symbol in 0..wfsa.alphabet_size() {
                if let Some(x) = encode(wfsa.transition(source, symbol, target)) {
                    writeln!(wtr, "{} {} {} {}", source, target, symbol, x)?;
                }
            }
        }
    }
    for (state, &w) in wfsa.finals().iter().enumerate() {
        if let Some(x) = encode(w) {
            writeln!(wtr, "{} {}", state, x)?;
        }
    }
    Ok(())
}

/// One line per sample: the path probability, the symbols, and the visited states, tab-separated.
pub fn write_samples<W: Write>(
    wtr: &mut W,
    samples: &[Sample],
    format: WeightFormat,
) -> Result<()> {
    let join = |xs: &[usize]| xs.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(" ");
    for sample in samples {
        let log_prob = format.from_log2(sample.log_prob);
        writeln!(wtr, "{}\t{}\t{}", log_prob, join(&sample.symbols), join(&sample.states))?;
    }
    Ok(())
}

/// Parse a corpus, one sequence per line. A line without digits is the empty sequence.
pub fn parse_corpus(contents: &str) -> Result<Corpus> {
    let mut sequences = vec![];
    for (i, line) in contents.lines().enumerate() {
        let symbols = line
            .split(|c: char| !c.is_ascii_digit())
            .filter(|x| !x.is_empty())
            .map(|token| parse_id(i + 1, token))
            .collect::<Result<Vec<_>>>()?;
        sequences.push(symbols);
    }
    Ok(Corpus::from_sequences(sequences))
}

// Read the file, or stdin if `file` is None.
fn read_to_string<P: AsRef<std::path::Path>>(file: &Option<P>) -> Result<String> {
    let stdin = std::io::stdin();
    let mut reader: Box<dyn BufRead> = match file {
        Some(file) => std::fs::File::open(file)
            .map(BufReader::new)
            .map(Box::new)?,
        None => Box::new(BufReader::new(stdin.lock())),
    };
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;
    Ok(contents)
}

pub fn read_wfsa<P: AsRef<std::path::Path>>(
    file: &Option<P>,
    format: WeightFormat,
) -> Result<Wfsa> {
    parse_wfsa(&read_to_string(file)?, format)
}

/// Read a corpus from the file, or from stdin if `file` is None.
pub fn read_corpus<P: AsRef<std::path::Path>>(file: &Option<P>) -> Result<Corpus> {
    parse_corpus(&read_to_string(file)?)
}
