//! Prompts for LLM-based invoice structuring.
//!
//! Two prompt shapes exist, one per strategy in [`crate::pipeline::llm`]:
//! a schema-guided prompt that embeds [`invoice_schema`], and a shorter
//! plain JSON-object prompt used when the first strategy fails.
//!
//! The JSON keys requested here are the serde names of
//! [`crate::model::InvoiceHeader`] and [`crate::model::LineItem`], so a
//! conforming reply deserialises without any key mapping.

use serde_json::{json, Map, Value};

/// Header keys whose values are strings.
pub const HEADER_TEXT_KEYS: [&str; 30] = [
    "invoice_number",
    "document_type",
    "issue_date",
    "due_date",
    "supplier_name",
    "supplier_tax_id",
    "supplier_activity",
    "supplier_address",
    "supplier_phone",
    "supplier_email",
    "customer_name",
    "customer_tax_id",
    "customer_address",
    "customer_district",
    "customer_city",
    "customer_business_line",
    "customer_code",
    "customer_phone",
    "customer_plate",
    "origin_address",
    "origin_city",
    "origin_district",
    "destination_address",
    "destination_city",
    "destination_district",
    "salesperson_code",
    "dispatch_type",
    "payment_method",
    "payment_terms",
    "notes",
];

/// Header keys whose values are numbers.
pub const HEADER_NUMBER_KEYS: [&str; 5] =
    ["subtotal", "discount_total", "tax_rate", "tax_amount", "total"];

/// Line-item keys and whether each holds a number.
pub const ITEM_KEYS: [(&str, bool); 9] = [
    ("code", false),
    ("description", false),
    ("quantity", true),
    ("unit", false),
    ("unit_price", true),
    ("discount", true),
    ("subtotal", true),
    ("tax", true),
    ("total", true),
];

/// System prompt for the schema-guided strategy.
pub const SCHEMA_SYSTEM_PROMPT: &str = "You are an assistant specialised in extracting structured data from Chilean invoices (facturas, boletas, guías de despacho). Extract EVERY header field (supplier, customer, origin, destination, totals) and EVERY line item. Search the whole document carefully. Reply with a single JSON object that conforms to the schema you are given and nothing else.";

/// System prompt for the plain JSON-object strategy.
pub const JSON_SYSTEM_PROMPT: &str = "You extract structured data from Chilean invoices. Reply with one valid JSON object only, with no Markdown and no commentary.";

const INSTRUCTIONS: &str = r#"The text below was extracted from an invoice and may contain OCR errors. Your task:
1. Identify and correct ALL header fields (document, supplier, customer, origin, destination, payment and totals)
2. Extract ALL line items with their quantities, prices and totals
3. Fix obvious OCR errors (e.g. "0" for "O" inside names) but keep numbers exactly as printed

RULES:
- Normalise dates to YYYY-MM-DD when possible
- Format RUTs as XX.XXX.XXX-X
- Monetary values are plain numbers without currency symbols, spaces or thousands separators
- Use null for any field that is not present
- Include EVERY line item you find, in document order
- Fields can appear anywhere in the document, not only in the first lines"#;

fn nullable(kind: &str) -> Value {
    json!({ "type": [kind, "null"] })
}

fn properties<'a>(keys: impl Iterator<Item = (&'a str, bool)>) -> Value {
    let mut props = Map::new();
    for (key, numeric) in keys {
        props.insert(
            key.to_string(),
            nullable(if numeric { "number" } else { "string" }),
        );
    }
    Value::Object(props)
}

/// JSON schema of a structured invoice: `{ header: {...}, detail: [...] }`.
pub fn invoice_schema() -> Value {
    let header_keys = HEADER_TEXT_KEYS
        .iter()
        .map(|k| (*k, false))
        .chain(HEADER_NUMBER_KEYS.iter().map(|k| (*k, true)));

    json!({
        "type": "object",
        "properties": {
            "header": {
                "type": "object",
                "properties": properties(header_keys),
                "required": []
            },
            "detail": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": properties(ITEM_KEYS.iter().copied()),
                    "required": []
                }
            }
        },
        "required": ["header", "detail"]
    })
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// User message for one structuring call.
///
/// `with_schema` embeds the full schema; otherwise only the key lists are
/// spelled out.
pub fn build_user_prompt(
    text: &str,
    max_chars: usize,
    expected_customer: Option<&str>,
    with_schema: bool,
) -> String {
    let mut prompt = String::from(INSTRUCTIONS);

    if let Some(customer) = expected_customer.filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!(
            "\n- The customer is a known company: normalise customer_name to \"{}\"",
            customer.trim()
        ));
    }

    if with_schema {
        let schema = serde_json::to_string_pretty(&invoice_schema()).unwrap_or_default();
        prompt.push_str("\n\nJSON SCHEMA:\n");
        prompt.push_str(&schema);
    } else {
        prompt.push_str("\n\nReturn {\"header\": {...}, \"detail\": [...]} where header has the keys: ");
        let header_keys: Vec<&str> = HEADER_TEXT_KEYS
            .iter()
            .chain(HEADER_NUMBER_KEYS.iter())
            .copied()
            .collect();
        prompt.push_str(&header_keys.join(", "));
        prompt.push_str("\nand every detail entry has the keys: ");
        let item_keys: Vec<&str> = ITEM_KEYS.iter().map(|(k, _)| *k).collect();
        prompt.push_str(&item_keys.join(", "));
    }

    prompt.push_str("\n\nINVOICE TEXT:\n");
    prompt.push_str(truncate_chars(text, max_chars));
    prompt
}
