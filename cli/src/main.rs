// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

//! `dsrs`: approximate count-distinct and heavy hitters over stdin lines.
//!
//! Modes, chosen by `--key`, `--raw` and `--merge`:
//!
//! 0. no flags: count distinct lines
//! 1. `--key`: count distinct lines per key (first space-delimited word)
//! 2. `--raw`: print the base64 sketch instead of the count
//! 3. `--key --raw`: one base64 sketch per key
//! 4. `--merge`: union base64 sketches, one per line, and print the count
//! 5. `--key --merge`: union `key sketch` lines per key
//! 6. `--raw --merge`: union sketches and print the merged sketch
//! 7. `--key --raw --merge`: like 5 but print merged sketches
//!
//! `--raw` output feeds a later `--merge`, so counting can be split across
//! processes and combined:
//!
//! ```bash
//! seq 100 | dsrs
//! # 100
//! (seq 1 60 | dsrs --raw; seq 40 100 | dsrs --raw) | dsrs --merge
//! # 100
//! ```
//!
//! `dsrs --hh k` prints `count line` for the approximate top-k lines, where
//! `count` is an upper bound on how often the line appeared.

mod counters;
mod stream_reducer;

use std::io::{self, BufRead, Write};

use clap::Parser;
use stream_sketches::cpc;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use counters::{Counter, HeavyHitter, KeyedCounter, KeyedMerger, Merger};
use stream_reducer::reduce_stream;

#[derive(Debug, Clone, Parser)]
#[clap(name = "dsrs", about = "Approximate count distinct lines.", version)]
struct Opt {
    /// Count distinct lines per key, where the key is the first word of each line
    /// (delimited by a space, which every line must contain). With `--merge`, the
    /// rest of each line is a sketch from `dsrs --raw`.
    #[clap(long)]
    key: bool,

    /// Print the base64 serialized sketch instead of the count.
    #[clap(long)]
    raw: bool,

    /// Read base64 sketches from upstream `dsrs --raw` runs and merge them.
    #[clap(long)]
    merge: bool,

    /// Print the approximate top-k lines with an upper bound on their counts.
    #[clap(long, value_name = "K", conflicts_with_all = ["key", "raw", "merge"])]
    hh: Option<u64>,

    /// Log2 of the CPC sketch size used for counting.
    #[clap(long, default_value_t = cpc::DEFAULT_LG_K,
           value_parser = clap::value_parser!(u8).range(cpc::MIN_LG_K as i64..=cpc::MAX_LG_K as i64))]
    lg_k: u8,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let opt = Opt::parse();
    debug!(?opt, "starting");
    let stdin = io::stdin();
    let stdout = io::stdout();
    run(&opt, stdin.lock(), &mut stdout.lock())
}

fn run<R: BufRead, W: Write>(opt: &Opt, input: R, out: &mut W) -> anyhow::Result<()> {
    if let Some(k) = opt.hh {
        if k == 0 {
            return Ok(());
        }
        let reduced = reduce_stream(input, HeavyHitter::new(k)?)?;
        for (line, count) in reduced.estimate() {
            writeln!(out, "{} {}", count, String::from_utf8_lossy(&line))?;
        }
        return Ok(());
    }

    match (opt.key, opt.merge) {
        (true, false) => {
            let reduced = reduce_stream(input, KeyedCounter::new(opt.lg_k)?)?;
            for (key, counter) in reduced.state() {
                write_keyed(out, key, counter, opt.raw)?;
            }
        }
        (false, false) => {
            let reduced = reduce_stream(input, Counter::new(opt.lg_k)?)?;
            write_single(out, &reduced, opt.raw)?;
        }
        (true, true) => {
            let reduced = reduce_stream(input, KeyedMerger::new(opt.lg_k)?)?;
            for (key, counter) in reduced.state() {
                write_keyed(out, key, &counter, opt.raw)?;
            }
        }
        (false, true) => {
            let reduced = reduce_stream(input, Merger::new(opt.lg_k)?)?;
            write_single(out, &reduced.counter(), opt.raw)?;
        }
    }
    Ok(())
}

fn write_keyed<W: Write>(out: &mut W, key: &[u8], counter: &Counter, raw: bool) -> io::Result<()> {
    write!(out, "{} ", String::from_utf8_lossy(key))?;
    write_single(out, counter, raw)
}

fn write_single<W: Write>(out: &mut W, counter: &Counter, raw: bool) -> io::Result<()> {
    if raw {
        writeln!(out, "{}", counter.serialize())
    } else {
        writeln!(out, "{}", counter.estimate().round())
    }
}
