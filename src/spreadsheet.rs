//! Two-sheet xlsx export: one `Header` row per invoice, one `Detail` row per
//! line item.
//!
//! Layout of both sheets: a merged title on row 1, column labels on row 3,
//! data from row 4. Blank fields are written as blank cells.

use crate::error::InvoiceError;
use crate::model::{Cell, Invoice, HEADER_COLUMNS, LINE_ITEM_COLUMNS};
use crate::output::BatchOutput;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const HEADER_SHEET: &str = "Header";
pub const DETAIL_SHEET: &str = "Detail";

const TITLE_ROW: u32 = 0;
const LABEL_ROW: u32 = 2;
const FIRST_DATA_ROW: u32 = 3;
const TITLE_ROW_HEIGHT: f64 = 25.0;
const HEADER_COLUMN_WIDTH: f64 = 20.0;
const DETAIL_COLUMN_WIDTH: f64 = 15.0;
const LABEL_FILL: u32 = 0x366092;

/// Label of the invoice column on the detail sheet.
pub const DETAIL_INVOICE_COLUMN: &str = "Invoice No.";

struct Styles {
    title: Format,
    label: Format,
    text: Format,
    number: Format,
    note: Format,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Format::new()
                .set_bold()
                .set_font_size(14)
                .set_align(FormatAlign::Left)
                .set_align(FormatAlign::VerticalCenter),
            label: Format::new()
                .set_bold()
                .set_font_color(Color::White)
                .set_background_color(Color::RGB(LABEL_FILL))
                .set_border(FormatBorder::Thin)
                .set_align(FormatAlign::Center)
                .set_align(FormatAlign::VerticalCenter)
                .set_text_wrap(),
            text: Format::new().set_border(FormatBorder::Thin),
            number: Format::new()
                .set_border(FormatBorder::Thin)
                .set_align(FormatAlign::Right),
            note: Format::new().set_italic(),
        }
    }
}

pub fn header_title(invoices: usize) -> String {
    format!("INVOICE HEADERS ({} invoice(s))", invoices)
}

pub fn detail_title(items: usize, invoices: usize) -> String {
    format!("LINE ITEMS ({} items from {} invoice(s))", items, invoices)
}

/// Invoice column value on the detail sheet; `position` is 1-based.
pub fn invoice_label(invoice: &Invoice, position: usize) -> String {
    match invoice.header.invoice_number.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => format!("Invoice {}", position),
    }
}

/// `path` with an `.xlsx` extension appended when it has none.
pub fn xlsx_path(path: &Path) -> PathBuf {
    let has_ext = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"));
    if has_ext {
        path.to_path_buf()
    } else {
        let mut s = path.as_os_str().to_owned();
        s.push(".xlsx");
        PathBuf::from(s)
    }
}

/// Build the workbook in memory.
pub fn build_workbook_bytes(invoices: &[Invoice]) -> Result<Vec<u8>, InvoiceError> {
    build(invoices).map_err(|e| InvoiceError::SpreadsheetFailed {
        detail: e.to_string(),
    })
}

fn build(invoices: &[Invoice]) -> Result<Vec<u8>, XlsxError> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name(HEADER_SHEET)?;
    write_header_sheet(sheet, invoices, &styles)?;

    let sheet = workbook.add_worksheet();
    sheet.set_name(DETAIL_SHEET)?;
    write_detail_sheet(sheet, invoices, &styles)?;

    workbook.save_to_buffer()
}

fn write_header_sheet(
    sheet: &mut Worksheet,
    invoices: &[Invoice],
    styles: &Styles,
) -> Result<(), XlsxError> {
    write_title(sheet, &header_title(invoices.len()), HEADER_COLUMNS.len(), styles)?;
    write_labels(sheet, HEADER_COLUMNS.iter().copied(), styles)?;

    for (i, invoice) in invoices.iter().enumerate() {
        let row = FIRST_DATA_ROW + i as u32;
        for (col, cell) in invoice.header.cells().iter().enumerate() {
            write_cell(sheet, row, col as u16, cell, styles)?;
        }
    }

    for col in 0..HEADER_COLUMNS.len() {
        sheet.set_column_width(col as u16, HEADER_COLUMN_WIDTH)?;
    }
    Ok(())
}

fn write_detail_sheet(
    sheet: &mut Worksheet,
    invoices: &[Invoice],
    styles: &Styles,
) -> Result<(), XlsxError> {
    let columns = 1 + LINE_ITEM_COLUMNS.len();
    let item_count: usize = invoices.iter().map(|inv| inv.items.len()).sum();
    write_title(sheet, &detail_title(item_count, invoices.len()), columns, styles)?;

    if item_count == 0 {
        sheet.write_string_with_format(LABEL_ROW, 0, "No line items found", &styles.note)?;
    } else {
        let labels = std::iter::once(DETAIL_INVOICE_COLUMN).chain(LINE_ITEM_COLUMNS.iter().copied());
        write_labels(sheet, labels, styles)?;

        let mut row = FIRST_DATA_ROW;
        for (i, invoice) in invoices.iter().enumerate() {
            let label = invoice_label(invoice, i + 1);
            for item in &invoice.items {
                sheet.write_string_with_format(row, 0, &label, &styles.text)?;
                for (col, cell) in item.cells().iter().enumerate() {
                    write_cell(sheet, row, col as u16 + 1, cell, styles)?;
                }
                row += 1;
            }
        }
    }

    for col in 0..columns {
        sheet.set_column_width(col as u16, DETAIL_COLUMN_WIDTH)?;
    }
    Ok(())
}

fn write_title(
    sheet: &mut Worksheet,
    title: &str,
    columns: usize,
    styles: &Styles,
) -> Result<(), XlsxError> {
    // A single-cell merge is rejected by the writer.
    if columns > 1 {
        sheet.merge_range(TITLE_ROW, 0, TITLE_ROW, columns as u16 - 1, title, &styles.title)?;
    } else {
        sheet.write_string_with_format(TITLE_ROW, 0, title, &styles.title)?;
    }
    sheet.set_row_height(TITLE_ROW, TITLE_ROW_HEIGHT)?;
    Ok(())
}

fn write_labels<'a>(
    sheet: &mut Worksheet,
    labels: impl Iterator<Item = &'a str>,
    styles: &Styles,
) -> Result<(), XlsxError> {
    for (col, label) in labels.enumerate() {
        sheet.write_string_with_format(LABEL_ROW, col as u16, label, &styles.label)?;
    }
    Ok(())
}

fn write_cell(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    cell: &Cell<'_>,
    styles: &Styles,
) -> Result<(), XlsxError> {
    match *cell {
        Cell::Text(Some(s)) => {
            sheet.write_string_with_format(row, col, s, &styles.text)?;
        }
        Cell::Number(Some(n)) => {
            sheet.write_number_with_format(row, col, n, &styles.number)?;
        }
        Cell::Text(None) => {
            sheet.write_blank(row, col, &styles.text)?;
        }
        Cell::Number(None) => {
            sheet.write_blank(row, col, &styles.number)?;
        }
    }
    Ok(())
}

/// Write the workbook to `path` (`.xlsx` appended when missing).
///
/// Uses atomic write (temp file + rename) to prevent partial files.
/// Returns the path actually written.
pub async fn write_workbook(
    invoices: &[Invoice],
    path: impl AsRef<Path>,
) -> Result<PathBuf, InvoiceError> {
    let path = xlsx_path(path.as_ref());
    let bytes = build_workbook_bytes(invoices)?;
    debug!("Workbook built: {} bytes", bytes.len());

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| InvoiceError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;
    }

    let tmp_path = path.with_extension("xlsx.tmp");
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| InvoiceError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| InvoiceError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    info!(
        "Wrote {} ({} invoice(s))",
        path.display(),
        invoices.len()
    );
    Ok(path)
}

/// Export every successfully extracted invoice that has an invoice number.
///
/// # Errors
/// [`InvoiceError::NoExportableInvoices`] when nothing qualifies.
pub async fn export_batch(
    batch: &BatchOutput,
    path: impl AsRef<Path>,
) -> Result<PathBuf, InvoiceError> {
    let invoices: Vec<Invoice> = batch.exportable().cloned().collect();
    if invoices.is_empty() {
        return Err(InvoiceError::NoExportableInvoices {
            total: batch.documents.len(),
        });
    }
    let skipped = batch.documents.len() - invoices.len();
    if skipped > 0 {
        info!(
            "Skipping {} document(s) without an extracted invoice number",
            skipped
        );
    }
    write_workbook(&invoices, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InvoiceHeader, LineItem};

    fn invoice(number: Option<&str>, items: usize) -> Invoice {
        Invoice {
            header: InvoiceHeader {
                invoice_number: number.map(str::to_string),
                total: Some(119000.0),
                ..Default::default()
            },
            items: (0..items)
                .map(|i| LineItem {
                    description: Some(format!("Item {i}")),
                    quantity: Some(1.0),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn titles_count_invoices_and_items() {
        assert_eq!(header_title(3), "INVOICE HEADERS (3 invoice(s))");
        assert_eq!(detail_title(7, 2), "LINE ITEMS (7 items from 2 invoice(s))");
    }

    #[test]
    fn missing_invoice_number_uses_position() {
        assert_eq!(invoice_label(&invoice(Some("4521"), 0), 1), "4521");
        assert_eq!(invoice_label(&invoice(None, 0), 3), "Invoice 3");
        assert_eq!(invoice_label(&invoice(Some("  "), 0), 2), "Invoice 2");
    }

    #[test]
    fn xlsx_extension_is_appended() {
        assert_eq!(xlsx_path(Path::new("out/report")), PathBuf::from("out/report.xlsx"));
        assert_eq!(xlsx_path(Path::new("report.XLSX")), PathBuf::from("report.XLSX"));
        assert_eq!(xlsx_path(Path::new("report.csv")), PathBuf::from("report.csv.xlsx"));
    }

    #[test]
    fn workbook_bytes_are_a_zip() {
        let bytes = build_workbook_bytes(&[invoice(Some("1"), 2), invoice(None, 0)]).unwrap();
        assert_eq!(&bytes[..2], b"PK");
        let empty = build_workbook_bytes(&[]).unwrap();
        assert_eq!(&empty[..2], b"PK");
    }

    #[tokio::test]
    async fn write_is_atomic_and_adds_extension() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_workbook(&[invoice(Some("1"), 1)], dir.path().join("nested/facturas"))
            .await
            .unwrap();
        assert_eq!(written, dir.path().join("nested/facturas.xlsx"));
        let bytes = std::fs::read(&written).unwrap();
        assert_eq!(&bytes[..2], b"PK");
        assert!(!dir.path().join("nested/facturas.xlsx.tmp").exists());
    }

    #[tokio::test]
    async fn export_without_numbered_invoices_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = export_batch(&BatchOutput::default(), dir.path().join("x.xlsx"))
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::NoExportableInvoices { total: 0 }));
    }
}
