//! Sample and histogram files: flat arrays of native-endian 4-byte integers.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use memmap2::{Mmap, MmapOptions};

use crate::{try_alloc, Error, Histogram, Result, I32_SIZE};

/// The first `n` samples of an input file, memory-mapped read-only.
pub struct Samples {
    mmap: Option<Mmap>,
    n: usize,
}

impl Samples {
    /// Maps `n` samples from `path`. Bytes past the last sample are ignored.
    pub fn open(path: impl AsRef<Path>, n: usize) -> Result<Self> {
        let file = File::open(path)?;
        if n == 0 {
            return Ok(Self { mmap: None, n });
        }

        let file_len = file.metadata()?.len();
        let actual = usize::try_from(file_len / I32_SIZE).unwrap_or(usize::MAX);
        if actual < n {
            return Err(Error::TruncatedInput {
                expected: n,
                actual,
            });
        }
        let mmap = unsafe { MmapOptions::new().len(n * I32_SIZE as usize).map(&file)? };
        Ok(Self {
            mmap: Some(mmap),
            n,
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn as_slice(&self) -> &[i32] {
        match &self.mmap {
            // Mappings start on a page boundary, so the prefix is empty.
            Some(mmap) => {
                let (prefix, samples, _) = unsafe { mmap.align_to::<i32>() };
                debug_assert!(prefix.is_empty());
                &samples[..self.n]
            }
            None => &[],
        }
    }
}

/// Persists `histogram` to a fresh file in the temporary directory and returns
/// its path. The file outlives the process; removing it is up to the caller.
pub fn write_histogram(histogram: &Histogram) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("histogram-")
        .suffix(".dat")
        .tempfile()?;
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        write_all(&mut writer, histogram.counts().iter().map(|&c| c as i32))?;
        writer.flush()?;
    }
    file.as_file().sync_data()?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

/// Writes `histogram` to `path`, replacing any existing file.
pub fn write_counts(path: impl AsRef<Path>, histogram: &Histogram) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_all(&mut writer, histogram.counts().iter().map(|&c| c as i32))?;
    writer.flush()?;
    Ok(())
}

/// Reads `bins` counts back from a histogram file.
pub fn read_counts(path: impl AsRef<Path>, bins: usize) -> Result<Vec<i32>> {
    let file = File::open(path)?;
    let actual = usize::try_from(file.metadata()?.len() / I32_SIZE).unwrap_or(usize::MAX);
    if actual < bins {
        return Err(Error::TruncatedInput {
            expected: bins,
            actual,
        });
    }
    let mut counts = try_alloc(bins, || 0i32)?;
    let mut reader = BufReader::new(file);
    let mut buf = [0u8; I32_SIZE as usize];
    for count in counts.iter_mut() {
        reader.read_exact(&mut buf)?;
        *count = i32::from_ne_bytes(buf);
    }
    Ok(counts)
}

/// Writes `values` as a flat native-endian array, replacing any existing file.
pub fn write_values(path: impl AsRef<Path>, values: &[i32]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_all(&mut writer, values.iter().copied())?;
    writer.flush()?;
    Ok(())
}

fn write_all(writer: &mut impl Write, values: impl Iterator<Item = i32>) -> Result<()> {
    for value in values {
        writer.write_all(&value.to_ne_bytes())?;
    }
    Ok(())
}
