//! Recipient roster loading.
//!
//! The roster is a spreadsheet with one row per certificate. Column headers
//! are matched by exact name after trimming, in any order; extra columns are
//! ignored. CSV is read with `csv`, Excel/OpenDocument workbooks with
//! `calamine` (first worksheet only). Loading has no side effects beyond
//! reading the file, so a failed load aborts a run before anything is sent.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use crate::error::{CertmailError, Result};

/// Header of the recipient name column.
pub const NAME_COLUMN: &str = "Nome";
/// Header of the recipient email column.
pub const EMAIL_COLUMN: &str = "Email";
/// Header of the certificate number column.
pub const NUMBER_COLUMN: &str = "Numero do Certificado";

/// Certificate numbers shorter than this are left-padded with zeros.
const MIN_NUMBER_WIDTH: usize = 4;

/// One row of the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// 1-based data row in the spreadsheet, header excluded.
    pub row: usize,
    pub name: String,
    pub email: String,
    /// Kept verbatim from the sheet; see [`Recipient::padded_number`].
    pub certificate_number: String,
}

impl Recipient {
    /// Certificate number left-padded with zeros to at least four digits.
    /// Longer numbers are kept as-is.
    pub fn padded_number(&self) -> String {
        let width = self.certificate_number.chars().count().max(MIN_NUMBER_WIDTH);
        format!("{:0>width$}", self.certificate_number)
    }
}

/// Positions of the three required columns within a header row.
#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    name: usize,
    email: usize,
    number: usize,
}

/// Load every recipient from `path`, dispatching on the file extension.
///
/// Rows are returned in spreadsheet order. Rows with all three cells empty
/// are skipped; a row with only some cells empty is an error naming the row.
pub fn load_recipients(path: &Path) -> Result<Vec<Recipient>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => load_csv(path),
        "xlsx" | "xls" | "ods" => load_workbook(path),
        other => Err(CertmailError::DataFormat(format!(
            "unsupported spreadsheet extension {other:?} (expected .csv, .xlsx, .xls or .ods)"
        ))),
    }
}

fn load_csv(path: &Path) -> Result<Vec<Recipient>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| CertmailError::FileRead(format!("{}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| CertmailError::FileRead(format!("{}: {e}", path.display())))?
        .clone();
    let columns = locate_columns(headers.iter())?;

    let mut recipients = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| CertmailError::FileRead(format!("{}: {e}", path.display())))?;
        let cells: Vec<String> = record.iter().map(str::to_string).collect();
        if let Some(recipient) = build_recipient(index + 1, &cells, columns)? {
            recipients.push(recipient);
        }
    }
    Ok(recipients)
}

fn load_workbook(path: &Path) -> Result<Vec<Recipient>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| CertmailError::FileRead(format!("{}: {e}", path.display())))?;

    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| CertmailError::DataFormat(format!("{}: no worksheets", path.display())))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| CertmailError::FileRead(format!("{}: {e}", path.display())))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| {
            CertmailError::DataFormat(format!("{}: worksheet {sheet:?} is empty", path.display()))
        })?
        .iter()
        .map(cell_text)
        .collect();
    let columns = locate_columns(headers.iter())?;

    let mut recipients = Vec::new();
    for (index, row) in rows.enumerate() {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        if let Some(recipient) = build_recipient(index + 1, &cells, columns)? {
            recipients.push(recipient);
        }
    }
    Ok(recipients)
}

/// Render a workbook cell the way it reads in the sheet. Whole floats lose
/// the trailing `.0` so certificate numbers survive Excel's numeric cells.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        // Formula errors (#N/A and friends) read as blank cells.
        _ => String::new(),
    }
}

fn locate_columns<I, S>(headers: I) -> Result<ColumnMap>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut name = None;
    let mut email = None;
    let mut number = None;

    for (index, header) in headers.into_iter().enumerate() {
        // First occurrence wins when a header repeats.
        match header.as_ref().trim() {
            NAME_COLUMN => name = name.or(Some(index)),
            EMAIL_COLUMN => email = email.or(Some(index)),
            NUMBER_COLUMN => number = number.or(Some(index)),
            _ => {}
        }
    }

    match (name, email, number) {
        (Some(name), Some(email), Some(number)) => Ok(ColumnMap {
            name,
            email,
            number,
        }),
        _ => {
            let mut missing = Vec::new();
            if name.is_none() {
                missing.push(NAME_COLUMN);
            }
            if email.is_none() {
                missing.push(EMAIL_COLUMN);
            }
            if number.is_none() {
                missing.push(NUMBER_COLUMN);
            }
            Err(CertmailError::DataFormat(format!(
                "missing required column(s): {}",
                missing.join(", ")
            )))
        }
    }
}

fn build_recipient(row: usize, cells: &[String], columns: ColumnMap) -> Result<Option<Recipient>> {
    let cell = |index: usize| cells.get(index).map(String::as_str).unwrap_or("").trim();

    let name = cell(columns.name);
    let email = cell(columns.email);
    let number = cell(columns.number);

    // Exported sheets often carry trailing filler rows.
    if name.is_empty() && email.is_empty() && number.is_empty() {
        return Ok(None);
    }

    let mut blank = Vec::new();
    if name.is_empty() {
        blank.push(NAME_COLUMN);
    }
    if email.is_empty() {
        blank.push(EMAIL_COLUMN);
    }
    if number.is_empty() {
        blank.push(NUMBER_COLUMN);
    }
    if !blank.is_empty() {
        return Err(CertmailError::DataFormat(format!(
            "row {row}: empty value for {}",
            blank.join(", ")
        )));
    }

    Ok(Some(Recipient {
        row,
        name: name.to_string(),
        email: email.to_string(),
        certificate_number: number.to_string(),
    }))
}

// ============================================================================
// Tests
// ============================================================================
