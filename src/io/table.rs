//! Atomic transition tables as CSV.
//!
//! Required columns: `wavelength`, `species`, `excitation_potential`, `loggf`.
//! Optional: `van_der_waals_broadening`, `clean`, `equivalent_width`,
//! `abundance`, `custom_mask`. Header names are matched case-insensitively.
//!
//! Writing always emits the full schema so a written table reloads with the
//! same columns and types.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::StringRecord;

use crate::domain::{AtomicTransition, CustomMasks, REQUIRED_COLUMNS, Species, TableError, TransitionTable};
use crate::domain::table::warn_missing_clean_column;

/// Column order used when writing.
pub const TABLE_COLUMNS: [&str; 9] = [
    "wavelength",
    "species",
    "excitation_potential",
    "loggf",
    "van_der_waals_broadening",
    "clean",
    "equivalent_width",
    "abundance",
    "custom_mask",
];

/// Load a transition table from a CSV file.
pub fn read_transitions(path: &Path, masks: CustomMasks) -> Result<TransitionTable, TableError> {
    let file = File::open(path).map_err(|e| TableError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    read_transitions_from(file, masks).map_err(|e| match e {
        TableError::Read { message, .. } => TableError::Read {
            path: path.display().to_string(),
            message,
        },
        other => other,
    })
}

/// Load a transition table from any CSV reader.
pub fn read_transitions_from<R: Read>(reader: R, masks: CustomMasks) -> Result<TransitionTable, TableError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);

    let headers = reader.headers().map_err(read_error)?.clone();
    let header_map = build_header_map(&headers);
    for column in REQUIRED_COLUMNS {
        if !header_map.contains_key(column) {
            return Err(TableError::MissingColumn(column.to_string()));
        }
    }
    if !header_map.contains_key("clean") {
        warn_missing_clean_column();
    }

    let mut transitions = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result.map_err(read_error)?;
        transitions.push(parse_row(&record, &header_map, row)?);
    }

    TransitionTable::new(transitions, masks)
}

/// Write `transitions` as CSV with the full schema.
pub fn write_transitions<W: Write>(writer: W, transitions: &[AtomicTransition]) -> Result<(), TableError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(TABLE_COLUMNS).map_err(write_error)?;
    for t in transitions {
        writer
            .write_record([
                t.wavelength.to_string(),
                t.species.0.to_string(),
                t.excitation_potential.to_string(),
                t.loggf.to_string(),
                t.van_der_waals_broadening.to_string(),
                t.clean.to_string(),
                format_measurement(t.equivalent_width),
                format_measurement(t.abundance),
                t.custom_mask.clone().unwrap_or_default(),
            ])
            .map_err(write_error)?;
    }
    writer.flush().map_err(|e| TableError::Write {
        path: "<output>".to_string(),
        message: e.to_string(),
    })
}

/// Write `transitions` to a CSV file.
pub fn write_transitions_path(path: &Path, transitions: &[AtomicTransition]) -> Result<(), TableError> {
    let file = File::create(path).map_err(|e| TableError::Write {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    write_transitions(file, transitions)
}

/// Unknown measurements are written as empty cells.
fn format_measurement(value: f64) -> String {
    if value.is_finite() { value.to_string() } else { String::new() }
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>, row: usize) -> Result<AtomicTransition, TableError> {
    let wavelength = parse_required(record, header_map, "wavelength", row)?;
    let species = parse_required(record, header_map, "species", row)?;
    let excitation_potential = parse_required(record, header_map, "excitation_potential", row)?;
    let loggf = parse_required(record, header_map, "loggf", row)?;

    let van_der_waals_broadening = parse_optional(record, header_map, "van_der_waals_broadening", row)?.unwrap_or(0.0);
    let equivalent_width = parse_optional(record, header_map, "equivalent_width", row)?.unwrap_or(f64::NAN);
    let abundance = parse_optional(record, header_map, "abundance", row)?.unwrap_or(f64::NAN);
    let clean = match get_optional(record, header_map, "clean") {
        Some(value) => parse_bool(value).ok_or_else(|| invalid(row, "clean", value))?,
        None => true,
    };
    let custom_mask = get_optional(record, header_map, "custom_mask").map(str::to_string);

    Ok(AtomicTransition {
        wavelength,
        species: Species(species),
        excitation_potential,
        loggf,
        van_der_waals_broadening,
        clean,
        equivalent_width,
        abundance,
        custom_mask,
    })
}

fn parse_required(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    column: &str,
    row: usize,
) -> Result<f64, TableError> {
    let value = get_optional(record, header_map, column).ok_or_else(|| TableError::NonFinite {
        row,
        column: column.to_string(),
    })?;
    value.parse::<f64>().map_err(|_| invalid(row, column, value))
}

fn parse_optional(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    column: &str,
    row: usize,
) -> Result<Option<f64>, TableError> {
    get_optional(record, header_map, column)
        .map(|value| value.parse::<f64>().map_err(|_| invalid(row, column, value)))
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn invalid(row: usize, column: &str, value: &str) -> TableError {
    TableError::InvalidValue {
        row,
        column: column.to_string(),
        value: value.to_string(),
    }
}

fn read_error(e: csv::Error) -> TableError {
    TableError::Read {
        path: "<input>".to_string(),
        message: e.to_string(),
    }
}

fn write_error(e: csv::Error) -> TableError {
    TableError::Write {
        path: "<output>".to_string(),
        message: e.to_string(),
    }
}

pub(crate) fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

pub(crate) fn get_optional<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
wavelength,species,excitation_potential,loggf,clean,equivalent_width
# Fe I
5044.211,26.0,2.851,-2.058,true,
5054.642,26.0,3.640,-1.921,false,42.5
5234.625,26.1,3.221,-2.180,1,61.0
";

    #[test]
    fn reads_optional_columns_with_defaults() {
        let table = read_transitions_from(TABLE.as_bytes(), CustomMasks::new()).unwrap();
        assert_eq!(table.len(), 3);
        let t = &table.transitions()[0];
        assert!(t.clean);
        assert!(t.equivalent_width.is_nan());
        assert_eq!(t.van_der_waals_broadening, 0.0);
        assert!(!table.transitions()[1].clean);
        assert_eq!(table.transitions()[1].equivalent_width, 42.5);
        assert!(!table.transitions()[2].is_neutral());
    }

    #[test]
    fn missing_required_column_is_named() {
        let csv = "wavelength,species,loggf\n5000.0,26.0,-1.0\n";
        let err = read_transitions_from(csv.as_bytes(), CustomMasks::new()).unwrap_err();
        assert!(matches!(err, TableError::MissingColumn(ref c) if c == "excitation_potential"));
    }

    #[test]
    fn headers_match_case_insensitively() {
        let csv = "\u{feff}Wavelength,SPECIES,Excitation_Potential,logGF\n5000.0,26.0,1.0,-1.0\n";
        let table = read_transitions_from(csv.as_bytes(), CustomMasks::new()).unwrap();
        assert_eq!(table.transitions()[0].loggf, -1.0);
    }

    #[test]
    fn invalid_clean_value_is_rejected() {
        let csv = "wavelength,species,excitation_potential,loggf,clean\n5000.0,26.0,1.0,-1.0,maybe\n";
        let err = read_transitions_from(csv.as_bytes(), CustomMasks::new()).unwrap_err();
        assert!(matches!(err, TableError::InvalidValue { row: 0, ref column, .. } if column == "clean"));
    }

    #[test]
    fn written_tables_reload_identically() {
        let mut masks = CustomMasks::new();
        masks.insert("telluric".to_string(), vec![[5000.2, 5000.4]]);
        let mut lines = vec![
            AtomicTransition::new(5000.0, 26.0, 1.5, -1.2).with_equivalent_width(33.25),
            AtomicTransition::new(5010.0, 26.1, 2.5, -2.2),
        ];
        lines[1].clean = false;
        lines[1].abundance = 7.42;
        lines[1].van_der_waals_broadening = -7.5;
        lines[0].custom_mask = Some("telluric".to_string());

        let file = tempfile::NamedTempFile::new().unwrap();
        write_transitions_path(file.path(), &lines).unwrap();
        let table = read_transitions(file.path(), masks).unwrap();

        let reloaded = table.transitions();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded[0].equivalent_width, 33.25);
        assert!(reloaded[0].abundance.is_nan());
        assert_eq!(reloaded[0].custom_mask.as_deref(), Some("telluric"));
        assert_eq!(reloaded[1].species, Species(26.1));
        assert!(!reloaded[1].clean);
        assert_eq!(reloaded[1].abundance, 7.42);
        assert_eq!(reloaded[1].van_der_waals_broadening, -7.5);
        assert!(reloaded[1].equivalent_width.is_nan());
    }
}
