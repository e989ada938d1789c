//! Grading harness: deterministic inputs, cached references, verification.
//!
//! Inputs and reference histograms are cached as flat files in a directory
//! (the system temporary directory by default) and reused across runs without
//! any invalidation.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use log::{debug, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{io, reference, try_with_capacity, Engine, Error, Result};

/// What a cached file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// `n` generated samples. The seed is not part of the key.
    Input { n: usize },
    /// Reference histogram of the cached `n`-sample input over `bins` bins.
    Reference { n: usize, bins: usize },
}

impl CacheKey {
    fn file_name(&self) -> String {
        match self {
            CacheKey::Input { n } => format!("input-{}.dat", n),
            CacheKey::Reference { n, bins } => format!("sol-{}-{}.dat", n, bins),
        }
    }
}

pub struct DatasetCache {
    dir: PathBuf,
}

impl DatasetCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn in_temp_dir() -> Self {
        Self::new(env::temp_dir())
    }

    pub fn path(&self, key: CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Path of the cached file for `key`, if one exists.
    pub fn lookup(&self, key: CacheKey) -> Option<PathBuf> {
        let path = self.path(key);
        path.is_file().then_some(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Args {
    pub n: usize,
    pub bins: usize,
    pub seed: Option<u64>,
}

impl Args {
    /// Parses `<N> <B> [seed]`, not including the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = args.into_iter().collect::<Vec<_>>();
        if args.len() < 2 {
            return Err(Error::config("expected <N> <B> [seed]"));
        }
        let parsed = Self {
            n: parse_arg("N", args[0].as_ref())?,
            bins: parse_arg("B", args[1].as_ref())?,
            seed: args.get(2).map(|s| parse_arg("seed", s.as_ref())).transpose()?,
        };
        if parsed.n > i32::MAX as usize {
            return Err(Error::config(format!("N={} does not fit a 4-byte count", parsed.n)));
        }
        if parsed.bins > i32::MAX as usize {
            return Err(Error::config(format!("B={} does not fit a 4-byte sample", parsed.bins)));
        }
        if parsed.bins == 0 && parsed.n > 0 {
            return Err(Error::config("B must be positive when N is"));
        }
        Ok(parsed)
    }
}

fn parse_arg<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::config(format!("{} must be a non-negative integer, got {:?}", name, value)))
}

/// `n` samples uniform in `[0, bins)`, reproducible for a given seed. `bins`
/// must be positive unless `n` is zero.
pub fn generate_samples(n: usize, bins: usize, seed: Option<u64>) -> Result<Vec<i32>> {
    let mut samples = try_with_capacity(n)?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let high = i32::try_from(bins).unwrap_or(i32::MAX);
    samples.extend((0..n).map(|_| rng.gen_range(0..high)));
    Ok(samples)
}

/// Returns the path of the `args.n`-sample input, generating it on a miss.
pub fn prepare_input(cache: &DatasetCache, args: &Args) -> Result<PathBuf> {
    let key = CacheKey::Input { n: args.n };
    println!("[1/4] Looking for input file");
    if let Some(path) = cache.lookup(key) {
        println!("\t- Input file: {} found, using existing input file", path.display());
        if let Some(seed) = args.seed {
            warn!(
                "seed {} ignored: input {} was generated earlier and its seed is unknown",
                seed,
                path.display()
            );
        }
        return Ok(path);
    }

    let path = cache.path(key);
    println!("\t- Input file not found. Creating new test data: {}", path.display());
    let start = Instant::now();
    let samples = generate_samples(args.n, args.bins, args.seed)?;
    if let Err(err) = io::write_values(&path, &samples) {
        // A partial file would be picked up as a valid input next time.
        let _ = fs::remove_file(&path);
        return Err(err);
    }
    debug!(
        "generate n={} bins={} elapsed={:.2}ms",
        args.n,
        args.bins,
        start.elapsed().as_secs_f64() * 1000.
    );
    Ok(path)
}

/// Returns the path of the reference histogram for `input`, counting it on a
/// miss.
pub fn prepare_reference(cache: &DatasetCache, args: &Args, input: &Path) -> Result<PathBuf> {
    let key = CacheKey::Reference {
        n: args.n,
        bins: args.bins,
    };
    let path = cache.path(key);
    println!("[2/4] Looking for verification file {}", path.display());
    if cache.lookup(key).is_some() {
        println!("[3/4] Verification file found, using existing verification data");
        return Ok(path);
    }

    println!("[3/4] Verification file not found. Creating new verification data");
    let samples = io::Samples::open(input, args.n)?;
    let histogram = reference::count(samples.as_slice(), args.bins)?;
    if let Err(err) = io::write_counts(&path, &histogram) {
        let _ = fs::remove_file(&path);
        return Err(err);
    }
    Ok(path)
}

/// Compares two histogram files bin by bin, reporting the first difference.
pub fn verify(expected: &Path, actual: &Path, bins: usize) -> Result<()> {
    let expected = io::read_counts(expected, bins)?;
    let actual = io::read_counts(actual, bins)?;
    match expected.iter().zip(&actual).position(|(e, a)| e != a) {
        Some(bin) => Err(Error::Mismatch {
            bin,
            expected: expected[bin],
            actual: actual[bin],
        }),
        None => Ok(()),
    }
}

/// Prepares the datasets, times `engine` on them, and checks its output.
///
/// The launch is planned first, so a histogram the engine cannot run leaves no
/// cache files behind. Returns the time spent inside the engine. The engine's
/// output file is removed once it has been verified.
pub fn run(args: &Args, cache: &DatasetCache, engine: &Engine) -> Result<Duration> {
    engine.plan(args.n, args.bins)?;
    let input = prepare_input(cache, args)?;
    let reference = prepare_reference(cache, args, &input)?;

    println!("[4/4] Running solution");
    let start = Instant::now();
    let output = engine.compute(&input, args.n, args.bins)?;
    let elapsed = start.elapsed();

    verify(&reference, &output, args.bins)?;
    fs::remove_file(&output)?;
    Ok(elapsed)
}
