//! LLM structuring: turn extracted invoice text into an [`Invoice`].
//!
//! Two prompt strategies are tried in order. The schema-guided prompt
//! carries the full JSON schema; when its call keeps failing or its reply
//! cannot be parsed, the plain JSON-object prompt is tried. All prompt text
//! lives in [`crate::prompts`].
//!
//! ## Retry Strategy
//!
//! Transport errors and timeouts are retried per strategy with exponential
//! backoff: retry `attempt` (1-based) waits `retry_backoff_ms * 2^(attempt-1)`.
//! An unparsable reply is not retried with the same prompt; it moves on to
//! the next strategy.

use crate::config::LlmConfig;
use crate::error::InvoiceError;
use crate::model::{Invoice, InvoiceHeader, LineItem};
use crate::output::TokenUsage;
use crate::pipeline::postprocess::extract_json_object;
use crate::prompts::{build_user_prompt, JSON_SYSTEM_PROMPT, SCHEMA_SYSTEM_PROMPT};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// How the model is asked for JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStrategy {
    /// Prompt embeds the invoice JSON schema.
    Schema,
    /// Prompt only lists the expected keys.
    JsonObject,
}

impl PromptStrategy {
    pub const ORDER: [PromptStrategy; 2] = [PromptStrategy::Schema, PromptStrategy::JsonObject];

    fn system_prompt(self) -> &'static str {
        match self {
            PromptStrategy::Schema => SCHEMA_SYSTEM_PROMPT,
            PromptStrategy::JsonObject => JSON_SYSTEM_PROMPT,
        }
    }

    fn label(self) -> &'static str {
        match self {
            PromptStrategy::Schema => "schema",
            PromptStrategy::JsonObject => "json-object",
        }
    }
}

/// Structure invoice text through the provider.
///
/// Token usage of every answered call is added to `usage`, including calls
/// whose reply turned out to be unusable.
///
/// # Errors
/// The last strategy's error once every strategy has failed. Callers fall
/// back to pattern matching.
pub async fn structure_invoice(
    provider: &Arc<dyn LLMProvider>,
    text: &str,
    config: &LlmConfig,
    usage: &mut TokenUsage,
) -> Result<Invoice, InvoiceError> {
    let start = Instant::now();
    let mut last_err = InvoiceError::LlmApiError {
        message: "no prompt strategy was attempted".to_string(),
    };

    for strategy in PromptStrategy::ORDER {
        match run_strategy(provider, text, config, strategy, usage).await {
            Ok(invoice) => {
                info!(
                    "LLM ({}) structured {} header fields and {} items in {:?}",
                    strategy.label(),
                    invoice.header.filled_fields(),
                    invoice.items.len(),
                    start.elapsed()
                );
                return Ok(invoice);
            }
            Err(e) => {
                warn!("LLM {} strategy failed: {}", strategy.label(), e);
                last_err = e;
            }
        }
    }

    Err(last_err)
}

/// Delay before retry `attempt` (1-based), saturating instead of overflowing.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

async fn run_strategy(
    provider: &Arc<dyn LLMProvider>,
    text: &str,
    config: &LlmConfig,
    strategy: PromptStrategy,
    usage: &mut TokenUsage,
) -> Result<Invoice, InvoiceError> {
    let user_prompt = build_user_prompt(
        text,
        config.max_input_chars,
        config.expected_customer.as_deref(),
        strategy == PromptStrategy::Schema,
    );
    let messages = vec![
        ChatMessage::system(strategy.system_prompt()),
        ChatMessage::user(&user_prompt),
    ];
    let options = build_options(config);
    let call_timeout = Duration::from_secs(config.api_timeout_secs);

    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "LLM {}: retry {}/{} after {}ms",
                strategy.label(),
                attempt,
                config.max_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(call_timeout, provider.chat(&messages, Some(&options))).await {
            Ok(Ok(response)) => {
                debug!(
                    "LLM {}: {} input tokens, {} output tokens",
                    strategy.label(),
                    response.prompt_tokens,
                    response.completion_tokens
                );
                usage.record(
                    response.prompt_tokens as u64,
                    response.completion_tokens as u64,
                );
                return parse_structured_response(&response.content);
            }
            Ok(Err(e)) => {
                let err_msg = format!("{}", e);
                warn!(
                    "LLM {}: attempt {} failed: {}",
                    strategy.label(),
                    attempt + 1,
                    err_msg
                );
                last_err = Some(err_msg);
            }
            Err(_) => {
                let err_msg = format!("no reply within {}s", config.api_timeout_secs);
                warn!("LLM {}: attempt {} {}", strategy.label(), attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
        }
    }

    Err(InvoiceError::LlmApiError {
        message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

/// Build `CompletionOptions` from the LLM config.
fn build_options(config: &LlmConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Reply parsing ────────────────────────────────────────────────────────

const HEADER_OBJECT_KEYS: [&str; 4] = ["header", "cabecera", "encabezado", "invoice"];
const DETAIL_ARRAY_KEYS: [&str; 5] = ["detail", "detalle", "items", "line_items", "lineas"];

/// Spanish reply keys and the record field each one fills.
const SPANISH_HEADER_KEYS: [(&str, &str); 35] = [
    ("numero_factura", "invoice_number"),
    ("tipo_documento", "document_type"),
    ("fecha_emision", "issue_date"),
    ("fecha_vencimiento", "due_date"),
    ("proveedor_nombre", "supplier_name"),
    ("proveedor_rut", "supplier_tax_id"),
    ("proveedor_actividad", "supplier_activity"),
    ("proveedor_direccion", "supplier_address"),
    ("proveedor_telefono", "supplier_phone"),
    ("proveedor_email", "supplier_email"),
    ("cliente_nombre", "customer_name"),
    ("cliente_rut", "customer_tax_id"),
    ("cliente_direccion", "customer_address"),
    ("cliente_comuna", "customer_district"),
    ("cliente_ciudad", "customer_city"),
    ("cliente_giro", "customer_business_line"),
    ("cliente_codigo", "customer_code"),
    ("cliente_telefono", "customer_phone"),
    ("cliente_patente", "customer_plate"),
    ("direccion_origen", "origin_address"),
    ("ciudad_origen", "origin_city"),
    ("comuna_origen", "origin_district"),
    ("direccion_destino", "destination_address"),
    ("ciudad_destino", "destination_city"),
    ("comuna_destino", "destination_district"),
    ("codigo_vendedor", "salesperson_code"),
    ("tipo_despacho", "dispatch_type"),
    ("forma_pago", "payment_method"),
    ("condiciones_pago", "payment_terms"),
    ("observaciones", "notes"),
    ("subtotal", "subtotal"),
    ("descuento_total", "discount_total"),
    ("impuesto_porcentaje", "tax_rate"),
    ("impuesto_monto", "tax_amount"),
    ("total", "total"),
];

const SPANISH_ITEM_KEYS: [(&str, &str); 9] = [
    ("codigo", "code"),
    ("descripcion", "description"),
    ("cantidad", "quantity"),
    ("unidad_medida", "unit"),
    ("precio_unitario", "unit_price"),
    ("descuento", "discount"),
    ("subtotal", "subtotal"),
    ("impuesto", "tax"),
    ("total_item", "total"),
];

/// Parse an LLM reply into an invoice.
///
/// Accepts fenced or bare JSON, `{header, detail}` or the Spanish
/// `{cabecera, detalle}` envelope, or a flat object that is the header
/// itself. Keys may be English or Spanish. Items that do not parse or
/// carry no value are skipped.
///
/// # Errors
/// [`InvoiceError::LlmInvalidResponse`] when no JSON object is found, the
/// header does not parse, or the reply holds no field at all.
pub fn parse_structured_response(reply: &str) -> Result<Invoice, InvoiceError> {
    let invalid = |detail: String| InvoiceError::LlmInvalidResponse { detail };

    let json = extract_json_object(reply).ok_or_else(|| invalid("no JSON object in reply".into()))?;
    let value: Value = serde_json::from_str(&json).map_err(|e| invalid(e.to_string()))?;
    let Value::Object(root) = value else {
        return Err(invalid("top-level JSON value is not an object".into()));
    };
    let root = lowercase_keys(root);

    let header_obj = HEADER_OBJECT_KEYS
        .iter()
        .find_map(|k| root.get(*k).and_then(Value::as_object).cloned())
        .unwrap_or_else(|| {
            let mut flat = root.clone();
            for key in DETAIL_ARRAY_KEYS {
                flat.remove(key);
            }
            flat
        });

    let header_obj = rename_keys(lowercase_keys(header_obj), &SPANISH_HEADER_KEYS);
    let header = InvoiceHeader::deserialize(Value::Object(header_obj))
        .map_err(|e| invalid(format!("header: {}", e)))?;

    let raw_items = DETAIL_ARRAY_KEYS
        .iter()
        .find_map(|k| root.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut items = Vec::with_capacity(raw_items.len());
    for (idx, raw) in raw_items.iter().enumerate() {
        let Some(obj) = raw.as_object() else {
            debug!("Skipping detail entry {}: not an object", idx + 1);
            continue;
        };
        let obj = rename_keys(lowercase_keys(obj.clone()), &SPANISH_ITEM_KEYS);
        match LineItem::deserialize(Value::Object(obj)) {
            Ok(mut item) if !item.cells().iter().all(|c| c.is_blank()) => {
                item.fill_missing_total();
                items.push(item);
            }
            Ok(_) => debug!("Skipping detail entry {}: no values", idx + 1),
            Err(e) => debug!("Skipping detail entry {}: {}", idx + 1, e),
        }
    }

    if header.filled_fields() == 0 && items.is_empty() {
        return Err(invalid("reply holds no invoice fields".into()));
    }

    Ok(Invoice { header, items })
}

fn lowercase_keys(obj: Map<String, Value>) -> Map<String, Value> {
    obj.into_iter()
        .map(|(k, v)| (k.trim().to_lowercase(), v))
        .collect()
}

/// Replace Spanish keys with their English names. An English key already
/// present wins over its Spanish alias.
fn rename_keys(obj: Map<String, Value>, table: &[(&str, &str)]) -> Map<String, Value> {
    let mut out = Map::with_capacity(obj.len());
    let mut aliased = Vec::new();
    for (key, value) in obj {
        match table.iter().find(|(es, en)| *es == key && *es != *en) {
            Some((_, en)) => aliased.push((en.to_string(), value)),
            None => {
                out.insert(key, value);
            }
        }
    }
    for (key, value) in aliased {
        out.entry(key).or_insert(value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_retry() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1000);
        assert_eq!(backoff_ms(500, 3), 2000);
    }

    #[test]
    fn backoff_saturates_on_large_attempts() {
        assert_eq!(backoff_ms(500, 64), u64::MAX);
        assert_eq!(backoff_ms(500, u32::MAX), u64::MAX);
    }

    fn expected() -> Invoice {
        Invoice {
            header: InvoiceHeader {
                invoice_number: Some("4521".into()),
                supplier_tax_id: Some("76.123.456-7".into()),
                total: Some(119000.0),
                ..Default::default()
            },
            items: vec![LineItem {
                description: Some("Servicio de mantención".into()),
                quantity: Some(2.0),
                unit_price: Some(50000.0),
                total: Some(100000.0),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&LlmConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(8000));
    }

    #[test]
    fn english_envelope_parses() {
        let reply = r#"{"header": {"invoice_number": "4521", "supplier_tax_id": "76.123.456-7", "total": 119000},
            "detail": [{"description": "Servicio de mantención", "quantity": 2, "unit_price": 50000, "total": 100000}]}"#;
        assert_eq!(parse_structured_response(reply).unwrap(), expected());
    }

    #[test]
    fn fenced_spanish_reply_maps_to_same_invoice() {
        let reply = "```json\n{\"cabecera\": {\"numero_factura\": 4521, \"proveedor_rut\": \"76.123.456-7\", \
            \"total\": \"$ 119.000\"}, \"detalle\": [{\"descripcion\": \"Servicio de mantención\", \
            \"cantidad\": 2, \"precio_unitario\": 50000, \"total_item\": null}]}\n```";
        assert_eq!(parse_structured_response(reply).unwrap(), expected());
    }

    #[test]
    fn flat_object_is_the_header() {
        let reply = r#"Here is the data: {"invoice_number": "4521", "supplier_tax_id": "76.123.456-7",
            "total": 119000, "items": [{"description": "Servicio de mantención", "quantity": 2,
            "unit_price": 50000, "total": 100000}]}"#;
        assert_eq!(parse_structured_response(reply).unwrap(), expected());
    }

    #[test]
    fn blank_and_malformed_items_are_skipped() {
        let reply = r#"{"header": {"invoice_number": "1"},
            "detail": [{"code": null, "total": null}, "oops", {"quantity": "many"}, {"code": "A1"}]}"#;
        let invoice = parse_structured_response(reply).unwrap();
        assert_eq!(invoice.items.len(), 1);
        assert_eq!(invoice.items[0].code.as_deref(), Some("A1"));
    }

    #[test]
    fn english_key_wins_over_spanish_alias() {
        let reply = r#"{"header": {"invoice_number": "A", "numero_factura": "B"}}"#;
        let invoice = parse_structured_response(reply).unwrap();
        assert_eq!(invoice.header.invoice_number.as_deref(), Some("A"));
    }

    #[test]
    fn empty_or_missing_json_is_invalid() {
        for reply in ["I could not find an invoice.", "{}", r#"{"header": {}, "detail": []}"#, "[1, 2]"] {
            assert!(
                matches!(
                    parse_structured_response(reply),
                    Err(InvoiceError::LlmInvalidResponse { .. })
                ),
                "{reply}"
            );
        }
    }
}
