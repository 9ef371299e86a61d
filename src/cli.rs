use crate::{deadline, tournament::MatchJob};
use std::{path::PathBuf, thread, time::Duration};

const USAGE: &str = "\
Usage: showdown [options] <arbiter> <competitor-a> <competitor-b>

Options:
  -n, --num-games <N>        number of matches to play (default 10)
  -j, --jobs <N>             matches to run at once (default: CPU count)
  -s, --show-detail <0|1>    print a line per finished match (default 1)
  -t, --read-timeout <DUR>   give up on a silent process after DUR, e.g. 500ms, 2s
  -r, --report-interval <N>  log progress every N matches
  -h, --help                 show this message";

#[derive(Debug, Clone, PartialEq)]
pub struct CliOptions {
    pub arbiter: PathBuf,
    pub competitors: [PathBuf; 2],
    pub num_games: u64,
    pub concurrency: usize,
    pub show_detail: bool,
    pub read_timeout: Option<Duration>,
    pub report_interval: Option<u64>,
}

impl CliOptions {
    pub fn jobs(&self) -> Vec<MatchJob> {
        (0..self.num_games)
            .map(|id| MatchJob {
                id,
                arbiter: self.arbiter.clone(),
                competitors: self.competitors.clone(),
                verbose: self.show_detail,
                read_timeout: self.read_timeout,
            })
            .collect()
    }
}

fn default_concurrency() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

fn value<I>(it: &mut I, flag: &str) -> Result<String, String>
where
    I: Iterator<Item = String>,
{
    it.next().ok_or_else(|| format!("Missing value for {flag}"))
}

fn number<T, I>(it: &mut I, flag: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    I: Iterator<Item = String>,
{
    let v = value(it, flag)?;
    v.parse::<T>()
        .map_err(|_| format!("Invalid value for {flag}: {v}"))
}

/// Parses arguments (without the program name). `Ok(None)` means help was
/// requested.
pub fn parse_from<I>(args: I) -> Result<Option<CliOptions>, String>
where
    I: IntoIterator<Item = String>,
{
    let mut it = args.into_iter();
    let mut positional = Vec::<PathBuf>::new();
    let mut num_games = 10;
    let mut concurrency = None;
    let mut show_detail = true;
    let mut read_timeout = None;
    let mut report_interval = None;

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-n" | "--num-games" => num_games = number(&mut it, &arg)?,
            "-j" | "--jobs" => concurrency = Some(number::<usize, _>(&mut it, &arg)?),
            "-s" | "--show-detail" => show_detail = number::<u32, _>(&mut it, &arg)? != 0,
            "-t" | "--read-timeout" => {
                let v = value(&mut it, &arg)?;
                read_timeout = Some(
                    deadline::parse(&v).ok_or_else(|| format!("Invalid duration for {arg}: {v}"))?,
                );
            }
            "-r" | "--report-interval" => report_interval = Some(number(&mut it, &arg)?),
            s if s.starts_with('-') && s.len() > 1 => return Err(format!("Unknown option {s}")),
            _ => positional.push(PathBuf::from(&arg)),
        }
    }

    let [arbiter, a, b]: [PathBuf; 3] = positional.try_into().map_err(|p: Vec<PathBuf>| {
        format!(
            "Expected an arbiter and two competitors, got {} path(s)",
            p.len()
        )
    })?;

    Ok(Some(CliOptions {
        arbiter,
        competitors: [a, b],
        num_games,
        concurrency: concurrency.unwrap_or_else(default_concurrency).max(1),
        show_detail,
        read_timeout,
        report_interval,
    }))
}

pub fn parse() -> Option<CliOptions> {
    match parse_from(std::env::args().skip(1)) {
        Ok(Some(options)) => Some(options),
        Ok(None) => {
            println!("{USAGE}");
            None
        }
        Err(message) => {
            eprintln!("{message}");
            eprintln!("{USAGE}");
            None
        }
    }
}
