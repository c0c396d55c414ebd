//! Invoice records: one header per document plus its line items.
//!
//! Both records are flat bags of optional attributes. A field that no
//! extraction stage could find stays `None` and becomes an empty cell in the
//! spreadsheet; there is no placeholder value anywhere.
//!
//! Deserialisation is lenient because the records are also the target of
//! LLM replies: amounts may arrive as `"$ 1.190.000"`, invoice numbers as
//! bare JSON numbers, and empty strings mean "not found".

use crate::pipeline::fields::parse_number;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One spreadsheet cell as produced by a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Text(Option<&'a str>),
    Number(Option<f64>),
}

impl Cell<'_> {
    pub fn is_blank(&self) -> bool {
        matches!(self, Cell::Text(None) | Cell::Number(None))
    }
}

/// Column labels of the header sheet, in the order of [`InvoiceHeader::cells`].
pub const HEADER_COLUMNS: [&str; 35] = [
    "Invoice No.",
    "Document Type",
    "Issue Date",
    "Due Date",
    "Supplier Name",
    "Supplier RUT",
    "Supplier Activity",
    "Supplier Address",
    "Supplier Phone",
    "Supplier Email",
    "Customer Name",
    "Customer RUT",
    "Customer Address",
    "Customer District",
    "Customer City",
    "Customer Business Line",
    "Customer Code",
    "Customer Phone",
    "Customer Plate",
    "Origin Address",
    "Origin City",
    "Origin District",
    "Destination Address",
    "Destination City",
    "Destination District",
    "Salesperson Code",
    "Dispatch Type",
    "Payment Method",
    "Payment Terms",
    "Notes",
    "Subtotal",
    "Discount Total",
    "Tax %",
    "Tax Amount",
    "Total",
];

/// Column labels of the detail sheet, in the order of [`LineItem::cells`].
pub const LINE_ITEM_COLUMNS: [&str; 9] = [
    "Code",
    "Description",
    "Quantity",
    "Unit",
    "Unit Price",
    "Discount",
    "Subtotal",
    "Tax",
    "Total",
];

/// Summary fields of one invoice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceHeader {
    #[serde(deserialize_with = "lenient_string")]
    pub invoice_number: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub document_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub issue_date: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub due_date: Option<String>,

    #[serde(deserialize_with = "lenient_string")]
    pub supplier_name: Option<String>,
    /// Chilean RUT of the issuer, `XX.XXX.XXX-X`.
    #[serde(deserialize_with = "lenient_string")]
    pub supplier_tax_id: Option<String>,
    /// Registered business activity (giro) of the issuer.
    #[serde(deserialize_with = "lenient_string")]
    pub supplier_activity: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub supplier_address: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub supplier_phone: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub supplier_email: Option<String>,

    #[serde(deserialize_with = "lenient_string")]
    pub customer_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub customer_tax_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub customer_address: Option<String>,
    /// Comuna.
    #[serde(deserialize_with = "lenient_string")]
    pub customer_district: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub customer_city: Option<String>,
    /// Giro.
    #[serde(deserialize_with = "lenient_string")]
    pub customer_business_line: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub customer_code: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub customer_phone: Option<String>,
    /// Vehicle licence plate (patente) on dispatch documents.
    #[serde(deserialize_with = "lenient_string")]
    pub customer_plate: Option<String>,

    #[serde(deserialize_with = "lenient_string")]
    pub origin_address: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub origin_city: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub origin_district: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub destination_address: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub destination_city: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub destination_district: Option<String>,

    #[serde(deserialize_with = "lenient_string")]
    pub salesperson_code: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub dispatch_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub payment_method: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub payment_terms: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub notes: Option<String>,

    #[serde(deserialize_with = "lenient_number")]
    pub subtotal: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub discount_total: Option<f64>,
    /// Tax rate in percent (19.0 for the Chilean IVA).
    #[serde(deserialize_with = "lenient_number")]
    pub tax_rate: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub tax_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub total: Option<f64>,
}

impl InvoiceHeader {
    /// Cell values in [`HEADER_COLUMNS`] order.
    pub fn cells(&self) -> [Cell<'_>; 35] {
        fn t(v: &Option<String>) -> Cell<'_> {
            Cell::Text(v.as_deref())
        }
        [
            t(&self.invoice_number),
            t(&self.document_type),
            t(&self.issue_date),
            t(&self.due_date),
            t(&self.supplier_name),
            t(&self.supplier_tax_id),
            t(&self.supplier_activity),
            t(&self.supplier_address),
            t(&self.supplier_phone),
            t(&self.supplier_email),
            t(&self.customer_name),
            t(&self.customer_tax_id),
            t(&self.customer_address),
            t(&self.customer_district),
            t(&self.customer_city),
            t(&self.customer_business_line),
            t(&self.customer_code),
            t(&self.customer_phone),
            t(&self.customer_plate),
            t(&self.origin_address),
            t(&self.origin_city),
            t(&self.origin_district),
            t(&self.destination_address),
            t(&self.destination_city),
            t(&self.destination_district),
            t(&self.salesperson_code),
            t(&self.dispatch_type),
            t(&self.payment_method),
            t(&self.payment_terms),
            t(&self.notes),
            Cell::Number(self.subtotal),
            Cell::Number(self.discount_total),
            Cell::Number(self.tax_rate),
            Cell::Number(self.tax_amount),
            Cell::Number(self.total),
        ]
    }

    /// Number of fields that hold a value.
    pub fn filled_fields(&self) -> usize {
        self.cells().iter().filter(|c| !c.is_blank()).count()
    }
}

/// One line item of an invoice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItem {
    #[serde(deserialize_with = "lenient_string")]
    pub code: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub quantity: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    pub unit: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub unit_price: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub discount: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub subtotal: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub tax: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub total: Option<f64>,
}

impl LineItem {
    /// Cell values in [`LINE_ITEM_COLUMNS`] order.
    pub fn cells(&self) -> [Cell<'_>; 9] {
        [
            Cell::Text(self.code.as_deref()),
            Cell::Text(self.description.as_deref()),
            Cell::Number(self.quantity),
            Cell::Text(self.unit.as_deref()),
            Cell::Number(self.unit_price),
            Cell::Number(self.discount),
            Cell::Number(self.subtotal),
            Cell::Number(self.tax),
            Cell::Number(self.total),
        ]
    }

    /// Compute `total = quantity × unit_price − discount` when the document
    /// did not state it. A zero total counts as missing.
    pub fn fill_missing_total(&mut self) {
        let missing = self.total.map_or(true, |t| t == 0.0);
        if !missing {
            return;
        }
        if let (Some(q), Some(p)) = (self.quantity, self.unit_price) {
            if q != 0.0 && p != 0.0 {
                self.total = Some(q * p - self.discount.unwrap_or(0.0));
            }
        }
    }
}

/// A complete invoice: header plus line items in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub header: InvoiceHeader,
    pub items: Vec<LineItem>,
}

impl Invoice {
    /// An invoice is exportable once it carries an invoice number.
    pub fn is_exportable(&self) -> bool {
        self.header
            .invoice_number
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty())
    }
}

// ── Lenient field deserialisers ──────────────────────────────────────────

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_number(&s),
        _ => None,
    })
}
