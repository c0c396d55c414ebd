//! Workbook contents: read the saved xlsx back and check what landed in the
//! cells of the `Header` and `Detail` sheets.

use invoice2xlsx::{write_workbook, Invoice, InvoiceHeader, LineItem};
use std::io::{Cursor, Read};
use std::path::Path;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Value of one cell as written to the sheet XML.
#[derive(Debug, PartialEq)]
enum Value {
    Blank,
    Text(String),
    Number(f64),
}

struct SavedWorkbook {
    workbook_xml: String,
    styles_xml: String,
    shared_strings: Vec<String>,
    sheets: Vec<String>,
}

impl SavedWorkbook {
    fn open(path: &Path) -> Self {
        let bytes = std::fs::read(path).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = |name: &str| -> Option<String> {
            let mut file = archive.by_name(name).ok()?;
            let mut xml = String::new();
            file.read_to_string(&mut xml).unwrap();
            Some(xml)
        };

        let shared_strings = entry("xl/sharedStrings.xml")
            .map(|xml| parse_shared_strings(&xml))
            .unwrap_or_default();
        Self {
            workbook_xml: entry("xl/workbook.xml").unwrap(),
            styles_xml: entry("xl/styles.xml").unwrap(),
            shared_strings,
            sheets: vec![
                entry("xl/worksheets/sheet1.xml").unwrap(),
                entry("xl/worksheets/sheet2.xml").unwrap(),
            ],
        }
    }

    fn header(&self, reference: &str) -> Option<Value> {
        self.cell(0, reference)
    }

    fn detail(&self, reference: &str) -> Option<Value> {
        self.cell(1, reference)
    }

    /// `None` when the cell was never written.
    fn cell(&self, sheet: usize, reference: &str) -> Option<Value> {
        let xml = &self.sheets[sheet];
        let needle = format!("<c r=\"{reference}\"");
        let mut from = 0;
        while let Some(pos) = xml[from..].find(&needle) {
            let start = from + pos;
            let rest = &xml[start + needle.len()..];
            from = start + needle.len();
            // `A1` must not match the start of `A10`.
            if !rest.starts_with([' ', '>', '/']) {
                continue;
            }
            let open_end = rest.find('>').unwrap();
            let open_tag = &rest[..open_end];
            if open_tag.ends_with('/') {
                return Some(Value::Blank);
            }
            let body = &rest[open_end + 1..rest.find("</c>").unwrap()];
            let raw = match (body.find("<v>"), body.find("</v>")) {
                (Some(a), Some(b)) => &body[a + 3..b],
                _ => return Some(Value::Blank),
            };
            return Some(if open_tag.contains("t=\"s\"") {
                let index: usize = raw.parse().unwrap();
                Value::Text(self.shared_strings[index].clone())
            } else {
                Value::Number(raw.parse().unwrap())
            });
        }
        None
    }
}

fn parse_shared_strings(xml: &str) -> Vec<String> {
    xml.split("<si>")
        .skip(1)
        .map(|si| {
            let t = &si[si.find("<t").unwrap()..];
            let text = &t[t.find('>').unwrap() + 1..t.find("</t>").unwrap()];
            text.replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&quot;", "\"")
                .replace("&apos;", "'")
                .replace("&amp;", "&")
        })
        .collect()
}

fn text(s: &str) -> Option<Value> {
    Some(Value::Text(s.to_string()))
}

fn numbered_invoice() -> Invoice {
    Invoice {
        header: InvoiceHeader {
            invoice_number: Some("4521".into()),
            issue_date: Some("14/10/2024".into()),
            customer_name: Some("COMERCIAL ANDES LTDA".into()),
            total: Some(28_560.0),
            ..Default::default()
        },
        items: vec![LineItem {
            code: Some("AB-1023".into()),
            description: Some("Fertilizante NPK".into()),
            quantity: Some(10.0),
            unit_price: Some(2_100.0),
            total: Some(21_000.0),
            ..Default::default()
        }],
    }
}

fn unnumbered_invoice() -> Invoice {
    Invoice {
        header: InvoiceHeader {
            supplier_name: Some("AGRICOLA SUR SPA".into()),
            ..Default::default()
        },
        items: vec![LineItem {
            description: Some("Flete".into()),
            total: Some(5_000.0),
            ..Default::default()
        }],
    }
}

async fn save(invoices: &[Invoice]) -> (tempfile::TempDir, SavedWorkbook) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_workbook(invoices, dir.path().join("facturas"))
        .await
        .unwrap();
    let saved = SavedWorkbook::open(&path);
    (dir, saved)
}

// ── Header sheet ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn sheets_are_named_header_and_detail() {
    let (_dir, wb) = save(&[numbered_invoice()]).await;
    let header = wb.workbook_xml.find("name=\"Header\"").unwrap();
    let detail = wb.workbook_xml.find("name=\"Detail\"").unwrap();
    assert!(header < detail);
}

#[tokio::test]
async fn header_sheet_has_title_labels_and_values() {
    let (_dir, wb) = save(&[numbered_invoice(), unnumbered_invoice()]).await;

    assert_eq!(wb.header("A1"), text("INVOICE HEADERS (2 invoice(s))"));
    assert_eq!(wb.header("A3"), text("Invoice No."));
    assert_eq!(wb.header("D3"), text("Due Date"));
    assert_eq!(wb.header("AI3"), text("Total"));

    assert_eq!(wb.header("A4"), text("4521"));
    assert_eq!(wb.header("C4"), text("14/10/2024"));
    assert_eq!(wb.header("K4"), text("COMERCIAL ANDES LTDA"));
    assert_eq!(wb.header("AI4"), Some(Value::Number(28_560.0)));
    assert_eq!(wb.header("E5"), text("AGRICOLA SUR SPA"));
}

#[tokio::test]
async fn unmatched_fields_are_blank_cells() {
    let (_dir, wb) = save(&[numbered_invoice(), unnumbered_invoice()]).await;

    // Due date and subtotal were never found.
    assert_eq!(wb.header("D4"), Some(Value::Blank));
    assert_eq!(wb.header("AE4"), Some(Value::Blank));
    // The second invoice has no number and no total.
    assert_eq!(wb.header("A5"), Some(Value::Blank));
    assert_eq!(wb.header("AI5"), Some(Value::Blank));
}

#[tokio::test]
async fn numeric_cells_are_right_aligned() {
    let (_dir, wb) = save(&[numbered_invoice()]).await;
    assert_eq!(wb.header("AI4"), Some(Value::Number(28_560.0)));
    assert!(wb.styles_xml.contains("horizontal=\"right\""));
}

// ── Detail sheet ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn detail_rows_carry_the_invoice_column() {
    let (_dir, wb) = save(&[numbered_invoice(), unnumbered_invoice()]).await;

    assert_eq!(wb.detail("A1"), text("LINE ITEMS (2 items from 2 invoice(s))"));
    assert_eq!(wb.detail("A3"), text("Invoice No."));
    assert_eq!(wb.detail("B3"), text("Code"));
    assert_eq!(wb.detail("J3"), text("Total"));

    assert_eq!(wb.detail("A4"), text("4521"));
    assert_eq!(wb.detail("B4"), text("AB-1023"));
    assert_eq!(wb.detail("D4"), Some(Value::Number(10.0)));
    assert_eq!(wb.detail("J4"), Some(Value::Number(21_000.0)));

    assert_eq!(wb.detail("A5"), text("Invoice 2"));
    assert_eq!(wb.detail("B5"), Some(Value::Blank));
    assert_eq!(wb.detail("C5"), text("Flete"));
}

#[tokio::test]
async fn unnumbered_first_invoice_is_labelled_by_position() {
    let (_dir, wb) = save(&[unnumbered_invoice()]).await;
    assert_eq!(wb.detail("A4"), text("Invoice 1"));
}

#[tokio::test]
async fn detail_without_items_holds_a_note() {
    let mut invoice = numbered_invoice();
    invoice.items.clear();
    let (_dir, wb) = save(&[invoice]).await;

    assert_eq!(wb.detail("A1"), text("LINE ITEMS (0 items from 1 invoice(s))"));
    assert_eq!(wb.detail("A3"), text("No line items found"));
    assert_eq!(wb.detail("A4"), None);
}
