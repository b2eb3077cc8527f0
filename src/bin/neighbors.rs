use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use sememe2vec::Vectors;

/// Interactively list the words closest to a word or a sum of words.
#[derive(Parser)]
struct Options {
    /// Vectors written by `sememe2vec --output`
    #[arg(value_name = "FILE")]
    file_name: PathBuf,

    /// Number of closest words to show
    #[arg(short = 'n', default_value_t = 40)]
    count: usize,
}

fn run(options: &Options) -> Result<()> {
    let vectors = Vectors::load(&options.file_name)?;
    let stdin = io::stdin();
    let mut input = stdin.lock();
    'outer: loop {
        print!("Enter word or sentence (EXIT to break): ");
        io::stdout().flush().context("error writing to stdout")?;

        let mut line = String::new();
        if input.read_line(&mut line).context("error reading stdin")? == 0 {
            break;
        }
        let line = line.trim();
        if line == "EXIT" {
            break;
        }

        let mut words: Vec<usize> = vec![];
        for word in line.split_whitespace() {
            println!();
            match vectors.lookup_word(word) {
                None => {
                    println!("Word: {word}  Out of dictionary word!");
                    continue 'outer;
                }
                Some(i) => {
                    println!("Word: {word}  Position in vocabulary: {i}");
                    words.push(i);
                }
            }
        }
        if words.is_empty() {
            continue;
        }

        println!();
        println!("                                              Word       Cosine distance");
        println!("------------------------------------------------------------------------");
        for (word, dist) in vectors.nearest(&words, options.count) {
            println!("{:>50}\t\t{}", word, dist);
        }
    }
    Ok(())
}

fn main() {
    let options = Options::parse();
    if let Err(err) = run(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
