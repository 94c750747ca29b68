//! Benchmark star lists.
//!
//! CSV columns: `star`, `effective_temperature`, `surface_gravity`,
//! `metallicity`, optional `microturbulence`, and optional initial guesses
//! `initial_effective_temperature`, `initial_surface_gravity`,
//! `initial_metallicity`, `initial_microturbulence` (all four or none).

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::StellarParameters;
use crate::io::table::{build_header_map, get_optional};

const INITIAL_COLUMNS: [&str; 4] = [
    "initial_effective_temperature",
    "initial_surface_gravity",
    "initial_metallicity",
    "initial_microturbulence",
];

#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("failed to read benchmark list '{path}': {message}")]
    Read { path: PathBuf, message: String },
    #[error("missing required column '{0}' in the benchmark list")]
    MissingColumn(String),
    #[error("line {line}: invalid value {value:?} in column '{column}'")]
    InvalidValue {
        line: usize,
        column: String,
        value: String,
    },
    #[error("benchmark list has no stars")]
    Empty,
}

/// One benchmark star with literature parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkStar {
    pub name: String,
    /// `microturbulence` is `NaN` when the list does not give one.
    pub literature: StellarParameters,
    pub initial: Option<StellarParameters>,
}

impl BenchmarkStar {
    /// Directory holding this star's spectra.
    pub fn spectra_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.name)
    }
}

pub fn read_benchmark_stars(path: &Path) -> Result<Vec<BenchmarkStar>, BenchmarkError> {
    let file = File::open(path).map_err(|e| BenchmarkError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    read_benchmark_stars_from(file).map_err(|e| match e {
        BenchmarkError::Read { message, .. } => BenchmarkError::Read {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })
}

pub fn read_benchmark_stars_from<R: Read>(reader: R) -> Result<Vec<BenchmarkStar>, BenchmarkError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);
    let read_error = |e: csv::Error| BenchmarkError::Read {
        path: PathBuf::from("<input>"),
        message: e.to_string(),
    };

    let headers = reader.headers().map_err(read_error)?.clone();
    let header_map = build_header_map(&headers);
    for column in ["star", "effective_temperature", "surface_gravity", "metallicity"] {
        if !header_map.contains_key(column) {
            return Err(BenchmarkError::MissingColumn(column.to_string()));
        }
    }

    let mut stars = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(read_error)?;
        stars.push(parse_star(&record, &header_map, line)?);
    }
    if stars.is_empty() {
        return Err(BenchmarkError::Empty);
    }
    Ok(stars)
}

fn parse_star(record: &StringRecord, header_map: &HashMap<String, usize>, line: usize) -> Result<BenchmarkStar, BenchmarkError> {
    let number = |column: &str| -> Result<Option<f64>, BenchmarkError> {
        get_optional(record, header_map, column)
            .map(|value| {
                value
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| BenchmarkError::InvalidValue {
                        line,
                        column: column.to_string(),
                        value: value.to_string(),
                    })
            })
            .transpose()
    };
    let required = |column: &str| -> Result<f64, BenchmarkError> {
        number(column)?.ok_or_else(|| BenchmarkError::InvalidValue {
            line,
            column: column.to_string(),
            value: String::new(),
        })
    };

    let name = get_optional(record, header_map, "star")
        .ok_or_else(|| BenchmarkError::InvalidValue {
            line,
            column: "star".to_string(),
            value: String::new(),
        })?
        .to_string();
    let literature = StellarParameters::new(
        required("effective_temperature")?,
        required("surface_gravity")?,
        required("metallicity")?,
        number("microturbulence")?.unwrap_or(f64::NAN),
    );

    let initial: Vec<Option<f64>> = INITIAL_COLUMNS.iter().map(|&c| number(c)).collect::<Result<_, _>>()?;
    let initial = match initial.as_slice() {
        [Some(t), Some(g), Some(m), Some(x)] => Some(StellarParameters::new(*t, *g, *m, *x)),
        _ => None,
    };

    Ok(BenchmarkStar {
        name,
        literature,
        initial,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_literature_and_optional_initial_guesses() {
        let csv = "\
star,effective_temperature,surface_gravity,metallicity,initial_effective_temperature,initial_surface_gravity,initial_metallicity,initial_microturbulence
Sun,5777,4.44,0.00,5700,4.3,-0.1,1.0
Arcturus,4286,1.64,-0.52,,,,
";
        let stars = read_benchmark_stars_from(csv.as_bytes()).unwrap();
        assert_eq!(stars.len(), 2);
        assert_eq!(stars[0].name, "Sun");
        assert_eq!(stars[0].initial, Some(StellarParameters::new(5700.0, 4.3, -0.1, 1.0)));
        assert!(stars[0].literature.microturbulence.is_nan());
        assert_eq!(stars[1].literature.metallicity, -0.52);
        assert_eq!(stars[1].initial, None);
        assert_eq!(stars[1].spectra_dir(Path::new("data")), Path::new("data/Arcturus"));
    }

    #[test]
    fn bad_rows_name_the_line_and_column() {
        let csv = "star,effective_temperature,surface_gravity,metallicity\nSun,hot,4.44,0.0\n";
        let err = read_benchmark_stars_from(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, BenchmarkError::InvalidValue { line: 2, ref column, .. } if column == "effective_temperature"));

        let csv = "star,effective_temperature,metallicity\n";
        let err = read_benchmark_stars_from(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, BenchmarkError::MissingColumn(ref c) if c == "surface_gravity"));
    }
}
