//! Loading and preparing a party's private integers.
//!
//! Values are whitespace-separated integers. Before a circuit is run, they are filtered to the
//! circuit's bit width and reduced to their maximum, which is the party's actual input.

use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use tracing::debug;

/// Errors raised while loading or preparing private data.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Data files must have a `.txt` extension.
    #[error("data file {0} must have a .txt extension")]
    NotTxt(PathBuf),
    /// The data file does not exist or cannot be read.
    #[error("could not read data from {path}: {source}")]
    Io {
        /// The file (or `-` for stdin).
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// A token is not an integer.
    #[error("could not parse {0:?} as an integer")]
    Parse(String),
    /// Bit widths must be between 1 and 63.
    #[error("unsupported bit width {0}, must be between 1 and 63")]
    BitWidth(u32),
    /// None of the values fits into the bit width.
    #[error("no value fits into {0} bits")]
    NoValueInRange(u32),
}

/// Returns the values `v` with `0 <= v < 2^bit_width`, in their original order.
pub fn filter_in_range(values: &[i64], bit_width: u32) -> Vec<u64> {
    let bound = 1u64.checked_shl(bit_width).unwrap_or(0);
    values
        .iter()
        .filter_map(|&v| u64::try_from(v).ok())
        .filter(|&v| bound == 0 || v < bound)
        .collect()
}

/// The private integers of one party.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateData {
    values: Vec<i64>,
}

impl PrivateData {
    /// Wraps already parsed values.
    pub fn new(values: Vec<i64>) -> Self {
        Self { values }
    }

    /// Parses whitespace-separated integers.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let values = text
            .split_whitespace()
            .map(|token| token.parse().map_err(|_| Error::Parse(token.to_string())))
            .collect::<Result<Vec<i64>, Error>>()?;
        Ok(Self { values })
    }

    /// Reads and parses all of `reader`, e.g. stdin.
    pub fn from_reader(mut reader: impl Read) -> Result<Self, Error> {
        let mut text = String::new();
        reader.read_to_string(&mut text).map_err(|source| Error::Io {
            path: PathBuf::from("-"),
            source,
        })?;
        Self::parse(&text)
    }

    /// Reads and parses a `.txt` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if path.extension().is_none_or(|ext| ext != "txt") {
            return Err(Error::NotTxt(path.to_path_buf()));
        }
        debug!(path = %path.display(), "reading private data");
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// All values as read.
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// The largest value that fits into `bit_width` bits.
    pub fn local_max(&self, bit_width: u32) -> Result<u64, Error> {
        if !(1..=63).contains(&bit_width) {
            return Err(Error::BitWidth(bit_width));
        }
        let in_range = filter_in_range(&self.values, bit_width);
        if in_range.len() < self.values.len() {
            debug!(
                dropped = self.values.len() - in_range.len(),
                bit_width, "ignoring values that do not fit the bit width"
            );
        }
        in_range
            .into_iter()
            .max()
            .ok_or(Error::NoValueInRange(bit_width))
    }

    /// [`PrivateData::local_max`] as `bit_width` bits, most significant bit first.
    pub fn max_bits(&self, bit_width: u32) -> Result<Vec<bool>, Error> {
        Ok(crate::data_types::to_bits(
            self.local_max(bit_width)?,
            bit_width,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parses_and_reduces_to_max() -> Result<(), Error> {
        let data = PrivateData::parse("3 9\n 2\t-4  17\n")?;
        assert_eq!(data.values(), &[3, 9, 2, -4, 17]);
        assert_eq!(data.local_max(4)?, 9);
        assert_eq!(data.local_max(5)?, 17);
        assert_eq!(data.max_bits(4)?, vec![true, false, false, true]);
        assert!(matches!(data.local_max(1), Err(Error::NoValueInRange(1))));
        assert!(matches!(data.local_max(0), Err(Error::BitWidth(0))));
        assert!(matches!(data.local_max(64), Err(Error::BitWidth(64))));
        Ok(())
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            PrivateData::parse("1 two 3"),
            Err(Error::Parse(token)) if token == "two"
        ));
        assert!(matches!(
            PrivateData::parse("").map(|d| d.local_max(4)),
            Ok(Err(Error::NoValueInRange(4)))
        ));
    }

    #[test]
    fn reads_files_and_readers() -> Result<(), Error> {
        let dir = std::env::temp_dir().join(format!("yao-max-data-{}", std::process::id()));
        fs::create_dir_all(&dir).map_err(|source| Error::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join("values.txt");
        let mut file = fs::File::create(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        writeln!(file, "5 1 4").map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        assert_eq!(PrivateData::from_file(&path)?.local_max(4)?, 5);

        assert!(matches!(
            PrivateData::from_file(dir.join("missing.txt")),
            Err(Error::Io { .. })
        ));
        assert!(matches!(
            PrivateData::from_file(dir.join("values.csv")),
            Err(Error::NotTxt(_))
        ));
        assert_eq!(PrivateData::from_reader("7 8".as_bytes())?.local_max(4)?, 8);
        let _ = fs::remove_dir_all(&dir);
        Ok(())
    }

    proptest! {
        #[test]
        fn filtering_is_idempotent(values in prop::collection::vec(any::<i64>(), 0..64), bits in 1u32..=63) {
            let once = filter_in_range(&values, bits);
            let as_i64: Vec<i64> = once.iter().map(|&v| v as i64).collect();
            prop_assert_eq!(filter_in_range(&as_i64, bits), once.clone());
            prop_assert!(once.iter().all(|&v| v < 1u64 << bits));
        }

        #[test]
        fn local_max_is_max_of_filtered(values in prop::collection::vec(-20i64..40, 1..32)) {
            let data = PrivateData::new(values.clone());
            let expected = values.iter().copied().filter(|v| (0..16).contains(v)).max();
            match expected {
                Some(max) => prop_assert_eq!(data.local_max(4).ok(), Some(max as u64)),
                None => prop_assert!(matches!(data.local_max(4), Err(Error::NoValueInRange(4)))),
            }
        }
    }
}
