// Fixed-section MPS reader and `name value` solution files.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;

use thiserror::Error;

use crate::model::{Column, ModelError, ObjectiveSense, Problem, Row};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid row type {0}")]
    InvalidRowType(String),
    #[error("invalid marker {0}")]
    InvalidMarker(String),
    #[error("invalid bound type {0}")]
    InvalidBoundsType(String),
    #[error("unsupported bound type {0}")]
    UnsupportedBoundsType(String),
    #[error("duplicate row name {0}")]
    DuplicateRowName(String),
    #[error("unexpected field {0}")]
    UnexpectedField(String),
    #[error("unknown row {0}")]
    UninitializedRow(String),
    #[error("unknown column {0}")]
    UninitializedVar(String),
    #[error("could not parse number {0}")]
    ParseNumberFailed(String),
    #[error("expected another line")]
    ExpectedLine,
    #[error("expected another field")]
    ExpectedField,
    #[error("expected keyword {0}")]
    ExpectedKeyword(String),
    #[error("more than one RHS set, found {0}")]
    NonUniqueRhsName(String),
    #[error("more than one BOUNDS set")]
    NonUniqueBoundsSets,
    #[error("unsupported file extension for {0}")]
    UnsupportedExtension(String),
    #[error("no value for column {0}")]
    MissingValue(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Clone, Copy)]
enum RowType {
    Objective,
    Equal,
    Lte,
    Gte,
}

struct PendingRow {
    name: String,
    rowtype: RowType,
    coeffs: Vec<(usize, f64)>,
    rhs: f64,
}

/// Reads an `.mps` or `.mps.gz` file.
pub fn read_problem(path: &Path) -> Result<Problem, ParseError> {
    let filename = path.to_string_lossy();
    if filename.ends_with(".mps.gz") {
        let file = std::fs::File::open(path)?;
        let decoder = flate2::read::GzDecoder::new(file);
        parse(std::io::BufReader::new(decoder))
    } else if filename.ends_with(".mps") {
        let content = std::fs::read(path)?;
        parse(content.as_slice())
    } else {
        Err(ParseError::UnsupportedExtension(filename.to_string()))
    }
}

/// Parses an MPS model. The first `N` row is the objective; its RHS entry is
/// the negated objective constant.
pub fn parse(input_text: impl BufRead) -> Result<Problem, ParseError> {
    let all_lines = input_text.lines().collect::<Result<Vec<_>, _>>()?;
    let mut lines = all_lines
        .iter()
        .filter(|l| l.split_ascii_whitespace().next().is_some() && !l.starts_with('*'))
        .peekable();

    macro_rules! expect_line {
        () => {
            lines.next().ok_or(ParseError::ExpectedLine)?
        };
    }

    macro_rules! expect_field {
        ($a:expr) => {
            $a.next().ok_or(ParseError::ExpectedField)?
        };
    }

    macro_rules! expect_keyword {
        ($a:expr,$b:expr) => {
            if expect_field!($a) != $b {
                return Err(ParseError::ExpectedKeyword($b.to_string()));
            }
        };
    }

    let name_line_str = expect_line!();
    let mut name_line = name_line_str.split_ascii_whitespace();
    expect_keyword!(name_line, "NAME");
    let name = name_line.next().unwrap_or("Unnamed problem");

    let rows_line = expect_line!();
    expect_keyword!(rows_line.split_ascii_whitespace(), "ROWS");

    let mut rows = Vec::new();
    let mut row_names = HashMap::new();

    while lines.peek().map(|n| n.starts_with(' ')).unwrap_or(false) {
        let row_str = expect_line!();
        let mut row = row_str.split_ascii_whitespace();
        let rowtype = match expect_field!(row) {
            "N" => RowType::Objective,
            "E" => RowType::Equal,
            "G" => RowType::Gte,
            "L" => RowType::Lte,
            x => return Err(ParseError::InvalidRowType(x.to_string())),
        };
        let row_name = expect_field!(row);
        if row_names.insert(row_name.to_string(), rows.len()).is_some() {
            return Err(ParseError::DuplicateRowName(row_name.to_string()));
        }
        rows.push(PendingRow {
            name: row_name.to_string(),
            rowtype,
            coeffs: Vec::new(),
            rhs: 0.,
        });
    }

    let columns_keyword_line = expect_line!();
    expect_keyword!(columns_keyword_line.split_ascii_whitespace(), "COLUMNS");
    let mut is_integer = false;

    let mut columns: Vec<Column> = Vec::new();
    let mut column_names = HashMap::new();

    while lines.peek().map(|n| n.starts_with(' ')).unwrap_or(false) {
        let col_line = expect_line!();
        let mut col = col_line.split_ascii_whitespace().peekable();
        let col_name = expect_field!(col);

        if col.peek() == Some(&"'MARKER'") {
            col.next();
            match expect_field!(col) {
                "'INTORG'" => is_integer = true,
                "'INTEND'" => is_integer = false,
                x => return Err(ParseError::InvalidMarker(x.to_string())),
            }
            continue;
        }

        let col_idx = *column_names.entry(col_name.to_string()).or_insert_with(|| {
            let mut column = Column::continuous(0., f64::INFINITY, 0.).with_name(col_name);
            column.is_integer = is_integer;
            columns.push(column);
            columns.len() - 1
        });

        while col.peek().is_some() {
            let row = expect_field!(col);
            let coeff = parse_number(expect_field!(col))?;
            let row_idx = *row_names
                .get(row)
                .ok_or_else(|| ParseError::UninitializedRow(row.to_string()))?;
            rows[row_idx].coeffs.push((col_idx, coeff));
        }
    }

    let rhs_keyword_line = expect_line!();
    expect_keyword!(rhs_keyword_line.split_ascii_whitespace(), "RHS");
    let mut rhs_name: Option<&str> = None;

    while lines.peek().map(|n| n.starts_with(' ')).unwrap_or(false) {
        let rhs_line_str = expect_line!();
        let mut rhs_line = rhs_line_str.split_ascii_whitespace().peekable();
        let this_rhs_name = expect_field!(rhs_line);

        match rhs_name {
            None => rhs_name = Some(this_rhs_name),
            Some(existing) if existing != this_rhs_name => {
                return Err(ParseError::NonUniqueRhsName(this_rhs_name.to_string()));
            }
            Some(_) => {}
        }

        while rhs_line.peek().is_some() {
            let row = expect_field!(rhs_line);
            let value = parse_number(expect_field!(rhs_line))?;
            let row_idx = *row_names
                .get(row)
                .ok_or_else(|| ParseError::UninitializedRow(row.to_string()))?;
            rows[row_idx].rhs = value;
        }
    }

    let mut bound_names = HashSet::new();

    if lines
        .peek()
        .map(|l| l.starts_with("BOUNDS"))
        .unwrap_or(false)
    {
        let bounds_keyword_line_str = expect_line!();
        expect_keyword!(bounds_keyword_line_str.split_ascii_whitespace(), "BOUNDS");
        while lines.peek().map(|n| n.starts_with(' ')).unwrap_or(false) {
            let bound_line_str = expect_line!();
            let mut bound = bound_line_str.split_ascii_whitespace();

            let bound_type_str = expect_field!(bound);
            bound_names.insert(expect_field!(bound).to_string());

            let col = expect_field!(bound);
            let column = &mut columns[*column_names
                .get(col)
                .ok_or_else(|| ParseError::UninitializedVar(col.to_string()))?];

            match bound_type_str {
                "FR" => {
                    column.lower = f64::NEG_INFINITY;
                    column.upper = f64::INFINITY;
                }
                "MI" => column.lower = f64::NEG_INFINITY,
                "PL" => column.upper = f64::INFINITY,
                "BV" => {
                    column.lower = 0.;
                    column.upper = 1.;
                    column.is_integer = true;
                }
                "LO" | "UP" | "FX" | "LI" | "UI" => {
                    let value = parse_number(expect_field!(bound))?;
                    if matches!(bound_type_str, "LO" | "FX" | "LI") {
                        column.lower = value;
                    }
                    if matches!(bound_type_str, "UP" | "FX" | "UI") {
                        column.upper = value;
                    }
                    if matches!(bound_type_str, "LI" | "UI") {
                        column.is_integer = true;
                    }
                }
                "SC" => return Err(ParseError::UnsupportedBoundsType("SC".to_string())),
                other => return Err(ParseError::InvalidBoundsType(other.to_string())),
            }

            if let Some(x) = bound.next() {
                return Err(ParseError::UnexpectedField(x.to_string()));
            }
        }
    }

    if bound_names.len() > 1 {
        return Err(ParseError::NonUniqueBoundsSets);
    }

    let endata_keyword_line = expect_line!();
    expect_keyword!(endata_keyword_line.split_ascii_whitespace(), "ENDATA");

    let mut problem = Problem::new(name, ObjectiveSense::Minimize);
    let mut objective_seen = false;
    for row in rows.iter() {
        if let RowType::Objective = row.rowtype {
            if objective_seen {
                continue;
            }
            objective_seen = true;
            for (col_idx, coeff) in row.coeffs.iter() {
                columns[*col_idx].objective += coeff;
            }
            problem.set_objective_offset(-row.rhs);
        }
    }
    for column in columns {
        problem.add_column(column)?;
    }
    for row in rows {
        let constraint = match row.rowtype {
            RowType::Objective => continue,
            RowType::Equal => Row::equal(row.rhs, row.coeffs),
            RowType::Lte => Row::less_equal(row.rhs, row.coeffs),
            RowType::Gte => Row::greater_equal(row.rhs, row.coeffs),
        };
        problem.add_row(constraint.with_name(row.name))?;
    }

    Ok(problem)
}

fn parse_number(field: &str) -> Result<f64, ParseError> {
    field
        .parse::<f64>()
        .map_err(|_| ParseError::ParseNumberFailed(field.to_string()))
}

/// Parses `name value` lines. Lines starting with `#` are skipped.
pub fn parse_solution(solution: &str) -> Result<Vec<(&str, f64)>, ParseError> {
    solution
        .lines()
        .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
        .map(|l| {
            let mut fields = l.split_ascii_whitespace();
            let name = fields.next().ok_or(ParseError::ExpectedField)?;
            let value = parse_number(fields.next().ok_or(ParseError::ExpectedField)?)?;
            Ok((name, value))
        })
        .collect()
}

/// Orders the values of a solution file by column. Every column needs a value.
pub fn point_from_solution(problem: &Problem, solution: &str) -> Result<Vec<f64>, ParseError> {
    let values = parse_solution(solution)?
        .into_iter()
        .collect::<HashMap<_, _>>();
    problem
        .columns()
        .iter()
        .map(|c| {
            values
                .get(c.name.as_str())
                .copied()
                .ok_or_else(|| ParseError::MissingValue(c.name.clone()))
        })
        .collect()
}

/// Writes a point in the format `parse_solution` reads.
pub fn write_solution(
    out: &mut impl std::io::Write,
    problem: &Problem,
    objective: f64,
    values: &[f64],
) -> std::io::Result<()> {
    writeln!(out, "# Objective value: {}", objective)?;
    for (column, value) in problem.columns().iter().zip(values.iter()) {
        writeln!(out, "{} {}", column.name, value)?;
    }
    Ok(())
}
