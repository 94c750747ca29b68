//! Observed spectra as two-column text files.
//!
//! One pixel per line: dispersion then flux, separated by whitespace or a
//! comma. Blank lines and `#` comments are ignored; extra columns (e.g.
//! uncertainties) are ignored too.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::{Spectrum, SpectrumError};

#[derive(Debug, Error)]
pub enum SpectrumFileError {
    #[error("failed to read spectrum '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("invalid spectrum '{path}': {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: SpectrumError,
    },
    #[error("no spectra (*.txt) found in '{0}'")]
    NoSpectra(PathBuf),
}

pub fn read_spectrum(path: &Path) -> Result<Spectrum, SpectrumFileError> {
    let text = fs::read_to_string(path).map_err(|source| SpectrumFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_spectrum(&text).map_err(|e| match e {
        ParseFailure::Line { line, message } => SpectrumFileError::Parse {
            path: path.to_path_buf(),
            line,
            message,
        },
        ParseFailure::Spectrum(source) => SpectrumFileError::Invalid {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Every `*.txt` file in `dir`, in file-name order.
pub fn read_spectra_dir(dir: &Path) -> Result<Vec<Spectrum>, SpectrumFileError> {
    let io_error = |source| SpectrumFileError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_error)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    if paths.is_empty() {
        return Err(SpectrumFileError::NoSpectra(dir.to_path_buf()));
    }
    paths.sort();
    paths.iter().map(|p| read_spectrum(p)).collect()
}

pub fn write_spectrum(path: &Path, spectrum: &Spectrum) -> Result<(), SpectrumFileError> {
    let io_error = |source| SpectrumFileError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::io::BufWriter::new(fs::File::create(path).map_err(io_error)?);
    writeln!(file, "# dispersion flux").map_err(io_error)?;
    for (x, y) in spectrum.dispersion().iter().zip(spectrum.flux()) {
        writeln!(file, "{x:.5} {y:.6}").map_err(io_error)?;
    }
    file.flush().map_err(io_error)
}

#[derive(Debug)]
enum ParseFailure {
    Line { line: usize, message: String },
    Spectrum(SpectrumError),
}

fn parse_spectrum(text: &str) -> Result<Spectrum, ParseFailure> {
    let mut dispersion = Vec::new();
    let mut flux = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let mut fields = content
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty());
        let (Some(x), Some(y)) = (fields.next(), fields.next()) else {
            return Err(ParseFailure::Line {
                line: i + 1,
                message: "expected two columns (dispersion, flux)".to_string(),
            });
        };
        let parse = |s: &str| {
            s.parse::<f64>().map_err(|_| ParseFailure::Line {
                line: i + 1,
                message: format!("invalid number {s:?}"),
            })
        };
        dispersion.push(parse(x)?);
        flux.push(parse(y)?);
    }
    Spectrum::new(dispersion, flux).map_err(ParseFailure::Spectrum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comments_and_mixed_separators() {
        let text = "# header\n5000.0 0.99\n\n5000.1,0.98  # note\n5000.2\t0.97 0.01\n";
        let spectrum = parse_spectrum(text).unwrap();
        assert_eq!(spectrum.dispersion(), &[5000.0, 5000.1, 5000.2]);
        assert_eq!(spectrum.flux(), &[0.99, 0.98, 0.97]);
    }

    #[test]
    fn reports_the_offending_line() {
        let err = parse_spectrum("5000.0 1.0\n5000.1\n").unwrap_err();
        assert!(matches!(err, ParseFailure::Line { line: 2, .. }));
        let err = parse_spectrum("5000.0 1.0\n4999.0 1.0\n").unwrap_err();
        assert!(matches!(err, ParseFailure::Spectrum(SpectrumError::NonIncreasing { .. })));
    }

    #[test]
    fn directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let blue = Spectrum::new(vec![4000.0, 4000.5, 4001.0], vec![1.0, 0.5, 1.0]).unwrap();
        let red = Spectrum::new(vec![6000.0, 6000.5], vec![0.9, 0.8]).unwrap();
        write_spectrum(&dir.path().join("a_blue.txt"), &blue).unwrap();
        write_spectrum(&dir.path().join("b_red.txt"), &red).unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let spectra = read_spectra_dir(dir.path()).unwrap();
        assert_eq!(spectra, vec![blue, red]);

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(read_spectra_dir(empty.path()), Err(SpectrumFileError::NoSpectra(_))));
    }
}
