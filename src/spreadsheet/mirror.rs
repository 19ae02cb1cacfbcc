//! Read-modify-write access to the invoice workbook

use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::invoice::{parse_amount, Invoice};

/// Column headers, in sheet order
pub const HEADERS: [&str; 9] = [
    "ID",
    "Client Name",
    "Invoice Number",
    "Invoice Date",
    "Due Date",
    "Subtotal",
    "Tax",
    "Total",
    "Status",
];

const SHEET_NAME: &str = "Invoices";

/// Spreadsheet errors
#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("Failed to read workbook: {0}")]
    Read(String),

    #[error("Failed to write workbook: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    Join(String),
}

impl From<calamine::XlsxError> for SpreadsheetError {
    fn from(err: calamine::XlsxError) -> Self {
        SpreadsheetError::Read(err.to_string())
    }
}

type Result<T> = std::result::Result<T, SpreadsheetError>;

/// A cell carried through a rewrite without being interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Excel serial date
    Date(f64),
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => Cell::Date(dt.as_f64()),
            other => Cell::Text(other.to_string()),
        }
    }
}

/// A sheet the mirror does not manage, kept cell for cell
#[derive(Debug, Clone, PartialEq)]
struct OtherSheet {
    name: String,
    /// Zero-based (row, column) of the first used cell
    origin: (u32, u32),
    rows: Vec<Vec<Cell>>,
}

/// The whole workbook as the mirror sees it
#[derive(Debug, Clone)]
struct MirrorFile {
    sheet_name: String,
    /// Header cells of user columns after Status
    extra_headers: Vec<Cell>,
    rows: Vec<MirrorRow>,
    other_sheets: Vec<OtherSheet>,
}

impl MirrorFile {
    fn empty() -> Self {
        Self {
            sheet_name: SHEET_NAME.to_string(),
            extra_headers: Vec::new(),
            rows: Vec::new(),
            other_sheets: Vec::new(),
        }
    }
}

/// One data row of the workbook.
///
/// `id` is `None` for rows the server did not write (hand-entered rows, or
/// files from before the ID column existed).
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorRow {
    pub id: Option<i64>,
    pub client_name: String,
    pub invoice_number: String,
    pub invoice_date: String,
    pub due_date: String,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub total: Option<f64>,
    pub status: String,
    /// Cells of user columns after Status
    pub extra: Vec<Cell>,
}

impl From<&Invoice> for MirrorRow {
    fn from(invoice: &Invoice) -> Self {
        Self {
            id: Some(invoice.id),
            client_name: invoice.client_name.clone().unwrap_or_default(),
            invoice_number: invoice.invoice_number.clone().unwrap_or_default(),
            invoice_date: invoice.invoice_date.clone().unwrap_or_default(),
            due_date: invoice.due_date.clone().unwrap_or_default(),
            subtotal: invoice.subtotal,
            tax: invoice.tax,
            total: invoice.total,
            status: invoice.status.clone(),
            extra: Vec::new(),
        }
    }
}

impl MirrorRow {
    /// Id match, or invoice-number match for rows without an id
    fn matches(&self, id: i64, invoice_number: Option<&str>) -> bool {
        match self.id {
            Some(row_id) => row_id == id,
            None => invoice_number.is_some_and(|n| !n.is_empty() && n == self.invoice_number),
        }
    }
}

/// Workbook mirror of the invoices table
pub struct SpreadsheetMirror {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SpreadsheetMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the workbook with its header row if it does not exist yet
    pub async fn ensure(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();

        run_blocking(move || {
            if !path.exists() {
                save_file(&path, &MirrorFile::empty())?;
                tracing::info!(path = %path.display(), "Created invoice workbook");
            }
            Ok(())
        })
        .await
    }

    /// All data rows currently in the workbook
    pub async fn rows(&self) -> Result<Vec<MirrorRow>> {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();

        run_blocking(move || Ok(load_file(&path)?.rows)).await
    }

    /// Append a newly ingested invoice
    pub async fn append(&self, invoice: &Invoice) -> Result<()> {
        let row = MirrorRow::from(invoice);
        self.modify(move |rows| rows.push(row)).await
    }

    /// Rewrite the row for an invoice, appending it when no row matches.
    ///
    /// `previous_number` is the invoice number before the edit, used to find
    /// rows that carry no id.
    pub async fn update(&self, invoice: &Invoice, previous_number: Option<&str>) -> Result<()> {
        let row = MirrorRow::from(invoice);
        let id = invoice.id;
        let previous_number = previous_number.map(str::to_string);

        self.modify(move |rows| {
            match rows
                .iter()
                .position(|r| r.matches(id, previous_number.as_deref()))
            {
                Some(index) => {
                    let extra = std::mem::take(&mut rows[index].extra);
                    rows[index] = MirrorRow { extra, ..row };
                }
                None => rows.push(row),
            }
        })
        .await
    }

    /// Remove the row for an invoice; returns whether a row was removed
    pub async fn remove(&self, id: i64, invoice_number: Option<&str>) -> Result<bool> {
        let invoice_number = invoice_number.map(str::to_string);

        self.modify(move |rows| {
            match rows
                .iter()
                .position(|r| r.matches(id, invoice_number.as_deref()))
            {
                Some(index) => {
                    rows.remove(index);
                    true
                }
                None => false,
            }
        })
        .await
    }

    /// Rewrite the rows the mirror owns from these invoices.
    ///
    /// Rows without an id stay, after the invoice rows, unless their invoice
    /// number matches an invoice, which then takes the row over. Returns the
    /// number of invoice rows written.
    pub async fn rebuild(&self, invoices: &[Invoice]) -> Result<usize> {
        let owned: Vec<MirrorRow> = invoices.iter().map(MirrorRow::from).collect();
        let count = owned.len();

        self.modify(move |rows| {
            let existing = std::mem::take(rows);
            *rows = merge_rebuild(existing, owned);
        })
        .await?;

        Ok(count)
    }

    async fn modify<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Vec<MirrorRow>) -> T + Send + 'static,
    {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();

        run_blocking(move || {
            let mut file = if path.exists() { load_file(&path)? } else { MirrorFile::empty() };
            let outcome = f(&mut file.rows);
            save_file(&path, &file)?;
            Ok(outcome)
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SpreadsheetError::Join(e.to_string()))?
}

fn merge_rebuild(existing: Vec<MirrorRow>, mut owned: Vec<MirrorRow>) -> Vec<MirrorRow> {
    let mut unowned = Vec::new();

    for row in existing {
        let target = owned.iter_mut().find(|candidate| match row.id {
            Some(id) => candidate.id == Some(id),
            None => !row.invoice_number.is_empty() && candidate.invoice_number == row.invoice_number,
        });

        match target {
            Some(candidate) => {
                if candidate.extra.is_empty() {
                    candidate.extra = row.extra;
                }
            }
            None if row.id.is_none() => unowned.push(row),
            // invoice no longer in the database
            None => {}
        }
    }

    owned.extend(unowned);
    owned
}

fn load_file(path: &Path) -> Result<MirrorFile> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let mut file = MirrorFile::empty();

    for (index, name) in workbook.sheet_names().into_iter().enumerate() {
        let range = match workbook.worksheet_range_at(index) {
            Some(range) => range?,
            None => continue,
        };

        if index == 0 {
            file.sheet_name = name;
            read_invoice_sheet(&range, &mut file);
        } else {
            file.other_sheets.push(OtherSheet {
                name,
                origin: range.start().unwrap_or((0, 0)),
                rows: range
                    .rows()
                    .map(|cells| cells.iter().map(Cell::from).collect())
                    .collect(),
            });
        }
    }

    Ok(file)
}

fn read_invoice_sheet(range: &Range<Data>, file: &mut MirrorFile) {
    let mut rows = range.rows();
    // Workbooks without a leading ID column have the same layout shifted left
    let (offset, header) = match rows.next() {
        Some(header) if cell_text(header.first()).eq_ignore_ascii_case("id") => (1, header),
        Some(header) => (0, header),
        None => return,
    };
    let width = HEADERS.len() - 1 + offset;
    let extra = |cells: &[Data]| -> Vec<Cell> { cells.iter().skip(width).map(Cell::from).collect() };

    file.extra_headers = extra(header);
    file.rows = rows
        .filter(|cells| cells.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|cells| {
            let at = |col: usize| cells.get(col + offset);
            MirrorRow {
                id: if offset == 1 { cell_id(cells.first()) } else { None },
                client_name: cell_text(at(0)),
                invoice_number: cell_text(at(1)),
                invoice_date: cell_text(at(2)),
                due_date: cell_text(at(3)),
                subtotal: cell_number(at(4)),
                tax: cell_number(at(5)),
                total: cell_number(at(6)),
                status: cell_text(at(7)),
                extra: extra(cells),
            }
        })
        .collect();
}

fn save_file(path: &Path, file: &MirrorFile) -> Result<()> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let date = Format::new().set_num_format("yyyy-mm-dd");
    let extra_col = HEADERS.len() as u16;

    let sheet = workbook.add_worksheet();
    sheet.set_name(&file.sheet_name)?;

    for (col, header) in HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &bold)?;
    }
    for (i, cell) in file.extra_headers.iter().enumerate() {
        write_cell(sheet, 0, extra_col + i as u16, cell, &date)?;
    }

    for (index, row) in file.rows.iter().enumerate() {
        let r = index as u32 + 1;

        if let Some(id) = row.id {
            sheet.write_number(r, 0, id as f64)?;
        }
        for (col, text) in [
            (1, &row.client_name),
            (2, &row.invoice_number),
            (3, &row.invoice_date),
            (4, &row.due_date),
            (8, &row.status),
        ] {
            if !text.is_empty() {
                sheet.write_string(r, col, text.as_str())?;
            }
        }
        for (col, amount) in [(5, row.subtotal), (6, row.tax), (7, row.total)] {
            if let Some(amount) = amount {
                sheet.write_number(r, col, amount)?;
            }
        }
        for (i, cell) in row.extra.iter().enumerate() {
            write_cell(sheet, r, extra_col + i as u16, cell, &date)?;
        }
    }

    for other in &file.other_sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(&other.name)?;

        let (top, left) = other.origin;
        for (r, cells) in other.rows.iter().enumerate() {
            for (c, cell) in cells.iter().enumerate() {
                write_cell(sheet, top + r as u32, (left as usize + c) as u16, cell, &date)?;
            }
        }
    }

    // Write beside the target and rename so readers never see a partial file
    let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    workbook.save(&tmp_path)?;
    std::fs::rename(&tmp_path, path)?;

    Ok(())
}

fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, cell: &Cell, date: &Format) -> Result<()> {
    match cell {
        Cell::Empty => {}
        Cell::Text(text) => {
            sheet.write_string(row, col, text.as_str())?;
        }
        Cell::Number(n) => {
            sheet.write_number(row, col, *n)?;
        }
        Cell::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
        Cell::Date(serial) => {
            sheet.write_number_with_format(row, col, *serial, date)?;
        }
    }
    Ok(())
}

fn cell_text(cell: Option<&Data>) -> String {
    match cell {
        None | Some(Data::Empty) => String::new(),
        Some(data) => data.to_string().trim().to_string(),
    }
}

fn cell_number(cell: Option<&Data>) -> Option<f64> {
    match cell? {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => parse_amount(s),
        _ => None,
    }
}

fn cell_id(cell: Option<&Data>) -> Option<i64> {
    match cell? {
        Data::Float(f) => Some(*f as i64),
        Data::Int(i) => Some(*i),
        Data::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
