//! Pattern-based population of invoice fields from plain text.
//!
//! Every header field owns an ordered list of regular expressions. The first
//! pattern that matches anywhere in its search scope wins; later patterns are
//! only tried when earlier ones find nothing. All patterns are
//! case-insensitive and multi-line, and values never cross a line break.
//!
//! The layout of Chilean electronic invoices puts the issuer block first and
//! the customer block after a `SEÑOR(ES):` marker. Supplier rules search the
//! text before that marker, customer rules the text from it on. Without a
//! marker both search the whole text.

use crate::model::{Invoice, InvoiceHeader, LineItem};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

// ── Pattern building blocks ──────────────────────────────────────────────

/// Number token: grouped thousands first, then plain digits with an
/// optional decimal part.
const NUM: &str = r"(\d{1,3}(?:[.,]\d{3})+(?:[.,]\d+)?|\d+(?:[.,]\d+)?)";

/// A value phrase: tokens separated by a single space or tab. Two or more
/// blanks end the phrase, which keeps side-by-side columns apart.
const PHRASE: &str = r"([\p{L}\d&.,'/()#°º\-]+(?:[ \t][\p{L}\d&.,'/()#°º\-]+)*)";

/// Chilean RUT, `12.345.678-9` or `12345678-K`.
const RUT: &str = r"(\d{1,2}\.?\d{3}\.?\d{3}[ \t]*-[ \t]*[\dkK])";

const DATE: &str = r"(\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4}|\d{4}[/.\-]\d{1,2}[/.\-]\d{1,2}|\d{1,2}[ \t]+de[ \t]+\p{L}+[ \t]+(?:de[ \t]+|del[ \t]+)?\d{4})";

const PHONE: &str = r"(\+?[\d(][\d \-()]{5,}\d)";

const AMOUNT: &str = r"[ \t]*:?[ \t]*\$?[ \t]*";

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| {
            let expanded = p
                .replace("{NUM}", NUM)
                .replace("{PHRASE}", PHRASE)
                .replace("{RUT}", RUT)
                .replace("{DATE}", DATE)
                .replace("{PHONE}", PHONE)
                .replace("{AMOUNT}", AMOUNT);
            Regex::new(&format!("(?im){expanded}")).unwrap()
        })
        .collect()
}

// ── Rule table ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Whole,
    Supplier,
    Customer,
}

/// Extra acceptance check on a candidate match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    None,
    /// Reject `Total` when preceded by `Sub` (`Sub Total`, `Sub-Total`).
    NotAfterSub,
    /// Reject an amount immediately followed by `%` (a tax rate).
    NotPercent,
}

enum Target {
    Text(fn(&mut InvoiceHeader) -> &mut Option<String>),
    Number(fn(&mut InvoiceHeader) -> &mut Option<f64>),
}

struct FieldRule {
    name: &'static str,
    target: Target,
    scope: Scope,
    guard: Guard,
    patterns: Vec<Regex>,
}

fn text(
    name: &'static str,
    scope: Scope,
    get: fn(&mut InvoiceHeader) -> &mut Option<String>,
    patterns: &[&str],
) -> FieldRule {
    FieldRule {
        name,
        target: Target::Text(get),
        scope,
        guard: Guard::None,
        patterns: compile(patterns),
    }
}

fn number(
    name: &'static str,
    guard: Guard,
    get: fn(&mut InvoiceHeader) -> &mut Option<f64>,
    patterns: &[&str],
) -> FieldRule {
    FieldRule {
        name,
        target: Target::Number(get),
        scope: Scope::Whole,
        guard,
        patterns: compile(patterns),
    }
}

static CUSTOMER_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)\b(?:SE[ÑN]OR(?:\(ES\)|ES|A)?|CLIENTE|CUSTOMER)[ \t]*:").unwrap()
});

static HEADER_RULES: Lazy<Vec<FieldRule>> = Lazy::new(|| {
    use Scope::*;
    vec![
        // ── Document identity ──
        text("document_type", Whole, |h| &mut h.document_type, &[
            r"\b(FACTURA[ \t]+(?:NO[ \t]+AFECTA[ \t]+O[ \t]+EXENTA[ \t]+|EXENTA[ \t]+)?ELECTR[ÓO]NICA|GU[ÍI]A[ \t]+DE[ \t]+DESPACHO(?:[ \t]+ELECTR[ÓO]NICA)?|NOTA[ \t]+DE[ \t]+CR[ÉE]DITO(?:[ \t]+ELECTR[ÓO]NICA)?|NOTA[ \t]+DE[ \t]+D[ÉE]BITO(?:[ \t]+ELECTR[ÓO]NICA)?|BOLETA(?:[ \t]+ELECTR[ÓO]NICA)?)",
            r"\bTIPO[ \t]+(?:DE[ \t]+)?DOCUMENTO[ \t]*:?[ \t]*{PHRASE}",
            r"^[ \t]*(FACTURA|INVOICE)[ \t]*$",
        ]),
        text("invoice_number", Whole, |h| &mut h.invoice_number, &[
            r"\bN[°º][ \t]*:?[ \t]*(\d[\d\-]*)",
            r"\bFOLIO[ \t]*(?:N[°º])?[ \t]*:?[ \t]*(\d+)",
            r"\b(?:FACTURA|FACT\.)[ \t]*(?:NRO\.?|NO\.|N[ÚU]MERO)?[ \t]*:?[ \t]*(\d[\d\-]*)",
            r"\bINVOICE[ \t]*(?:NO\.?|NUMBER|#)?[ \t]*:?[ \t]*([A-Z]*\d[A-Z\d\-]*)",
            r"#[ \t]*(\d[\d\-]*)",
        ]),
        text("issue_date", Whole, |h| &mut h.issue_date, &[
            r"\bFECHA[ \t]+(?:DE[ \t]+)?EMISI[ÓO]N[ \t]*:?[ \t]*{DATE}",
            r"\b(?:FECHA|DATE|EMITID[OA])[ \t]*:?[ \t]*{DATE}",
        ]),
        text("due_date", Whole, |h| &mut h.due_date, &[
            r"\b(?:FECHA[ \t]+(?:DE[ \t]+)?VENCIMIENTO|VENCIMIENTO|DUE[ \t]+DATE)[ \t]*:?[ \t]*{DATE}",
        ]),
        // ── Supplier ──
        text("supplier_name", Supplier, |h| &mut h.supplier_name, &[
            r"\b(?:RAZ[ÓO]N[ \t]+SOCIAL|PROVEEDOR|EMISOR)[ \t]*:?[ \t]*{PHRASE}",
            r"^[ \t]*(\p{L}[\p{L}\d&.,' \-]*?[ \t]+(?:S\.A\.C\.|S\.?A\.?|SPA|LTDA\.?|LIMITADA|E\.I\.R\.L\.))(?:[ \t]{2,}|[ \t]*$)",
            r"\b(?:EMPRESA|COMPANY)[ \t]*:?[ \t]*{PHRASE}",
        ]),
        text("supplier_tax_id", Supplier, |h| &mut h.supplier_tax_id, &[
            r"\bR\.?U\.?T\.?[ \t]*(?:N[°º])?[ \t]*:?[ \t]*{RUT}",
            r"\b(?:NIT|N\.I\.T\.|CUIT)[ \t]*:?[ \t]*([\d.\-]+[\dkK])",
            RUT,
        ]),
        text("supplier_activity", Supplier, |h| &mut h.supplier_activity, &[
            r"\b(?:GIRO|ACTIVIDAD(?:[ \t]+ECON[ÓO]MICA)?)[ \t]*:?[ \t]*{PHRASE}",
        ]),
        text("supplier_address", Supplier, |h| &mut h.supplier_address, &[
            r"\b(?:DIRECCI[ÓO]N|DOMICILIO|CASA[ \t]+MATRIZ|ADDRESS)[ \t]*:[ \t]*{PHRASE}",
        ]),
        text("supplier_phone", Supplier, |h| &mut h.supplier_phone, &[
            r"\b(?:TEL[ÉE]FONO|TEL[ÉE]F?\.?|FONO|PHONE)[ \t]*:?[ \t]*{PHONE}",
        ]),
        text("supplier_email", Supplier, |h| &mut h.supplier_email, &[
            r"([\w.+\-]+@[\w\-]+(?:\.[\w\-]+)+)",
        ]),
        // ── Customer ──
        text("customer_name", Customer, |h| &mut h.customer_name, &[
            r"\bSE[ÑN]OR(?:\(ES\)|ES|A)?[ \t]*:[ \t]*{PHRASE}",
            r"\b(?:CLIENTE|CUSTOMER|RAZ[ÓO]N[ \t]+SOCIAL|NOMBRE)[ \t]*:[ \t]*{PHRASE}",
        ]),
        text("customer_tax_id", Customer, |h| &mut h.customer_tax_id, &[
            r"\bR\.?U\.?T\.?[ \t]*:?[ \t]*{RUT}",
            RUT,
        ]),
        text("customer_address", Customer, |h| &mut h.customer_address, &[
            r"\b(?:DIRECCI[ÓO]N|DOMICILIO)[ \t]*:[ \t]*{PHRASE}",
        ]),
        text("customer_district", Customer, |h| &mut h.customer_district, &[
            r"\bCOMUNA[ \t]*:[ \t]*{PHRASE}",
        ]),
        text("customer_city", Customer, |h| &mut h.customer_city, &[
            r"\bCIUDAD[ \t]*:[ \t]*{PHRASE}",
        ]),
        text("customer_business_line", Customer, |h| &mut h.customer_business_line, &[
            r"\bGIRO[ \t]*:[ \t]*{PHRASE}",
        ]),
        text("customer_code", Customer, |h| &mut h.customer_code, &[
            r"\bC[ÓO]D(?:IGO|\.)?[ \t]+CLIENTE[ \t]*:?[ \t]*([\w\-]*\d[\w\-]*)",
            r"\bC[ÓO]DIGO[ \t]*:[ \t]*(\d+)",
        ]),
        text("customer_phone", Customer, |h| &mut h.customer_phone, &[
            r"\b(?:TEL[ÉE]FONO|FONO|TEL\.?)[ \t]*:[ \t]*{PHONE}",
        ]),
        text("customer_plate", Customer, |h| &mut h.customer_plate, &[
            r"\bPATENTE[ \t]*:?[ \t]*([A-Z0-9]{2,4}(?:[ \t\-]?[A-Z0-9]{2,4}){1,2})",
        ]),
        // ── Origin / destination ──
        text("origin_address", Whole, |h| &mut h.origin_address, &[
            r"\bDIRECCI[ÓO]N[ \t]+(?:DE[ \t]+)?ORIGEN[ \t]*:?[ \t]*{PHRASE}",
            r"\bORIGEN[ \t]*:[ \t]*{PHRASE}",
        ]),
        text("origin_city", Whole, |h| &mut h.origin_city, &[
            r"\bCIUDAD[ \t]+(?:DE[ \t]+)?ORIGEN[ \t]*:?[ \t]*{PHRASE}",
        ]),
        text("origin_district", Whole, |h| &mut h.origin_district, &[
            r"\bCOMUNA[ \t]+(?:DE[ \t]+)?ORIGEN[ \t]*:?[ \t]*{PHRASE}",
        ]),
        text("destination_address", Whole, |h| &mut h.destination_address, &[
            r"\bDIRECCI[ÓO]N[ \t]+(?:DE[ \t]+)?DESTINO[ \t]*:?[ \t]*{PHRASE}",
            r"\bDESTINO[ \t]*:[ \t]*{PHRASE}",
        ]),
        text("destination_city", Whole, |h| &mut h.destination_city, &[
            r"\bCIUDAD[ \t]+(?:DE[ \t]+)?DESTINO[ \t]*:?[ \t]*{PHRASE}",
        ]),
        text("destination_district", Whole, |h| &mut h.destination_district, &[
            r"\bCOMUNA[ \t]+(?:DE[ \t]+)?DESTINO[ \t]*:?[ \t]*{PHRASE}",
        ]),
        // ── Commercial terms ──
        text("salesperson_code", Whole, |h| &mut h.salesperson_code, &[
            r"\bC[ÓO]D(?:IGO|\.)?[ \t]*(?:DE[ \t]+)?VENDEDOR[ \t]*:?[ \t]*([A-Z\d\-]*\d[A-Z\d\-]*)",
        ]),
        text("dispatch_type", Whole, |h| &mut h.dispatch_type, &[
            r"\bTIPO[ \t]+(?:DE[ \t]+)?DESPACHO[ \t]*:?[ \t]*{PHRASE}",
        ]),
        text("payment_method", Whole, |h| &mut h.payment_method, &[
            r"\bFORMA[ \t]+(?:DE[ \t]+)?PAGO[ \t]*:?[ \t]*{PHRASE}",
            r"\b(?:MEDIO[ \t]+DE[ \t]+PAGO|PAYMENT[ \t]+METHOD)[ \t]*:?[ \t]*{PHRASE}",
        ]),
        text("payment_terms", Whole, |h| &mut h.payment_terms, &[
            r"\b(?:CONDICI[ÓO]N(?:ES)?[ \t]+DE[ \t]+(?:PAGO|VENTA)|PLAZO(?:[ \t]+DE[ \t]+PAGO)?|PAYMENT[ \t]+TERMS)[ \t]*:?[ \t]*{PHRASE}",
        ]),
        text("notes", Whole, |h| &mut h.notes, &[
            r"\b(?:OBSERVACI[ÓO]N(?:ES)?|OBS\.|NOTAS?|REFERENCIAS?)[ \t]*:[ \t]*{PHRASE}",
        ]),
        // ── Totals ──
        number("subtotal", Guard::None, |h| &mut h.subtotal, &[
            r"\b(?:SUB[ \t\-]?TOTAL|MONTO[ \t]+NETO|TOTAL[ \t]+NETO|NETO|MONTO[ \t]+AFECTO|AFECTO){AMOUNT}{NUM}",
        ]),
        number("discount_total", Guard::None, |h| &mut h.discount_total, &[
            r"\b(?:DESCUENTOS?|DESCTO\.?|DSCTO\.?|DISCOUNT)(?:[ \t]+GLOBAL)?{AMOUNT}{NUM}",
        ]),
        number("tax_rate", Guard::None, |h| &mut h.tax_rate, &[
            r"\b(?:IVA|I\.V\.A\.?|IMPUESTO|TAX)[ \t]*\(?[ \t]*(\d{1,2}(?:[.,]\d+)?)[ \t]*%",
        ]),
        number("tax_amount", Guard::NotPercent, |h| &mut h.tax_amount, &[
            r"\b(?:IVA|I\.V\.A\.?|IMPUESTO|TAX)(?:[ \t]*\(?[ \t]*\d{1,2}(?:[.,]\d+)?[ \t]*%[ \t]*\)?)?{AMOUNT}{NUM}",
        ]),
        number("total", Guard::NotAfterSub, |h| &mut h.total, &[
            r"\b(?:TOTAL[ \t]+A[ \t]+PAGAR|MONTO[ \t]+TOTAL|TOTAL[ \t]+FACTURA|TOTAL){AMOUNT}{NUM}",
        ]),
    ]
});

// ── Header extraction ────────────────────────────────────────────────────

/// Populate every header field that has a matching pattern. Unmatched
/// fields stay `None`.
pub fn extract_header(text: &str) -> InvoiceHeader {
    let (supplier_scope, customer_scope) = match CUSTOMER_MARKER.find(text) {
        Some(m) => (&text[..m.start()], &text[m.start()..]),
        None => (text, text),
    };

    let mut header = InvoiceHeader::default();
    for rule in HEADER_RULES.iter() {
        let scope = match rule.scope {
            Scope::Whole => text,
            Scope::Supplier => supplier_scope,
            Scope::Customer => customer_scope,
        };
        let Some(raw) = find_first(scope, &rule.patterns, rule.guard) else {
            continue;
        };
        match &rule.target {
            Target::Text(get) => *get(&mut header) = Some(raw),
            Target::Number(get) => *get(&mut header) = parse_number(&raw),
        }
        debug!("Pattern match for {}", rule.name);
    }

    // A lone RUT on the page belongs to the issuer, not the customer.
    if header.customer_tax_id.is_some() && header.customer_tax_id == header.supplier_tax_id {
        header.customer_tax_id = None;
    }
    header
}

/// First match of the first pattern that matches, trimmed with internal
/// whitespace collapsed.
fn find_first(text: &str, patterns: &[Regex], guard: Guard) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures_iter(text)
            .find(|caps| accepts(text, caps, guard))
            .and_then(|caps| caps.get(1))
            .map(|m| collapse_whitespace(m.as_str()))
            .filter(|v| !v.is_empty())
    })
}

fn accepts(text: &str, caps: &Captures<'_>, guard: Guard) -> bool {
    let Some(whole) = caps.get(0) else {
        return false;
    };
    match guard {
        Guard::None => true,
        Guard::NotAfterSub => {
            let before = text[..whole.start()].trim_end_matches([' ', '\t', '-']);
            !before.to_lowercase().ends_with("sub")
        }
        Guard::NotPercent => !text[whole.end()..].trim_start_matches([' ', '\t']).starts_with('%'),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Number parsing ───────────────────────────────────────────────────────

/// Parse an amount as printed on an invoice.
///
/// Handles `$ 1.190.000`, `1.234,56`, `1,234.56`, `1234,5` and plain
/// numbers. A dot followed by exactly three digits is a thousands separator.
/// Returns `None` when the text is not a number.
pub fn parse_number(raw: &str) -> Option<f64> {
    let mut s: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '$' | '€' | '£' | '¥'))
        .collect();
    for prefix in ["CLP", "USD", "US", "EUR"] {
        if s.get(..prefix.len()).is_some_and(|p| p.eq_ignore_ascii_case(prefix)) {
            s = s[prefix.len()..].to_string();
            break;
        }
    }
    if s.is_empty() {
        return None;
    }

    let normalised = match (s.rfind('.'), s.rfind(',')) {
        // Both present: whichever comes last is the decimal separator.
        (Some(dot), Some(comma)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (None, Some(_)) => {
            let mut parts = s.split(',');
            let decimals = parts.nth(1).map_or(0, str::len);
            if s.matches(',').count() == 1 && decimals <= 2 {
                s.replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
        (Some(_), None) => {
            if is_dot_grouped(&s) {
                s.replace('.', "")
            } else {
                s
            }
        }
        (None, None) => s,
    };

    normalised.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `1.190.000` or `45.000`, but not `0.125` or `3.5`.
fn is_dot_grouped(s: &str) -> bool {
    let digits = s.trim_start_matches('-');
    let mut groups = digits.split('.');
    let Some(lead) = groups.next() else {
        return false;
    };
    let rest: Vec<&str> = groups.collect();
    if rest.len() > 1 {
        return rest.iter().all(|g| g.len() == 3);
    }
    !lead.is_empty()
        && lead.len() <= 3
        && lead != "0"
        && rest.first().is_some_and(|g| g.len() == 3)
}

// ── Detail extraction ────────────────────────────────────────────────────

static RE_DETAIL_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)\b(?:DETALLE|ITEMS|PRODUCTOS|DESCRIPCI[ÓO]N)\b[^\n]*\n(.*?)(?:\bSUB[ \t\-]?TOTAL\b|\bMONTO[ \t]+NETO\b|\bTOTAL\b|\z)",
    )
    .unwrap()
});

static RE_ITEM_LINE: Lazy<Regex> = Lazy::new(|| {
    let unit = r"(UN|UND|UNI|UNID|UNIDAD(?:ES)?|KG|KGS|GR|LT|LTS|MT|MTS|M2|M3|CJ|CAJA|CAJAS|PZA|PZ|SET|HR|HRS|SERV|GL|TON|PAR)\.?";
    Regex::new(&format!(
        r"(?i)^{NUM}[ \t]+(?:{unit}[ \t]+)?(.+?)[ \t]+\$?[ \t]*{NUM}(?:[ \t]+\$?[ \t]*{NUM})?[ \t]*$"
    ))
    .unwrap()
});

static RE_DECIMAL_LOOKING: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+[.,]\d+").unwrap());

static RE_NUMBER_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(NUM).unwrap());

static RE_NOT_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:R\.?U\.?T\.?|FECHA|SUB[ \t\-]?TOTAL|TOTAL|NETO|IVA|TEL[ÉE]FONO|FONO|FOLIO|GIRO|DIRECCI[ÓO]N|COMUNA|CIUDAD)\b|@",
    )
    .unwrap()
});

/// Locate the item section and parse each plausible line into a
/// [`LineItem`]. Missing totals are computed.
pub fn extract_line_items(text: &str) -> Vec<LineItem> {
    let section = RE_DETAIL_SECTION
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(text);

    section
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().count() >= 10 && !RE_NOT_ITEM.is_match(line))
        .filter_map(parse_item_line)
        .map(|mut item| {
            item.fill_missing_total();
            item
        })
        .collect()
}

fn parse_item_line(line: &str) -> Option<LineItem> {
    if let Some(caps) = RE_ITEM_LINE.captures(line) {
        let desc = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
        if desc.chars().any(char::is_alphabetic) {
            let (code, description) = split_code(desc);
            return Some(LineItem {
                code,
                description: Some(collapse_whitespace(description)),
                quantity: caps.get(1).and_then(|m| parse_number(m.as_str())),
                unit: caps.get(2).map(|m| m.as_str().to_uppercase()),
                unit_price: caps.get(4).and_then(|m| parse_number(m.as_str())),
                total: caps.get(5).and_then(|m| parse_number(m.as_str())),
                ..Default::default()
            });
        }
    }

    if !RE_DECIMAL_LOOKING.is_match(line) {
        return None;
    }
    let numbers: Vec<f64> = RE_NUMBER_TOKEN
        .find_iter(line)
        .filter_map(|m| parse_number(m.as_str()))
        .collect();
    let rest = RE_NUMBER_TOKEN.replace_all(line, "");
    let description = collapse_whitespace(rest.trim_matches(|c: char| c.is_whitespace() || c == '$'));
    let description = description.replace(" $", "").replace("$ ", "");
    if description.chars().count() <= 3 || !description.chars().any(char::is_alphabetic) {
        return None;
    }

    let n = numbers.len();
    Some(LineItem {
        description: Some(description),
        total: numbers.last().copied(),
        unit_price: (n > 1).then(|| numbers[n - 2]),
        quantity: (n > 2).then(|| numbers[0]),
        ..Default::default()
    })
}

/// Split a leading product code (`AB-1023 Tornillo`) off a description.
fn split_code(desc: &str) -> (Option<String>, &str) {
    if let Some((first, rest)) = desc.split_once(char::is_whitespace) {
        let has_digit = first.chars().any(|c| c.is_ascii_digit());
        let has_alpha = first.chars().any(char::is_alphabetic);
        if has_digit && has_alpha && rest.chars().any(char::is_alphabetic) {
            return (Some(first.to_string()), rest.trim_start());
        }
    }
    (None, desc)
}

/// Header and detail from text alone.
pub fn extract_invoice(text: &str) -> Invoice {
    Invoice {
        header: extract_header(text),
        items: extract_line_items(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chilean_amounts() {
        assert_eq!(parse_number("$ 1.190.000"), Some(1_190_000.0));
        assert_eq!(parse_number("45.000"), Some(45_000.0));
        assert_eq!(parse_number("CLP 12.500"), Some(12_500.0));
    }

    #[test]
    fn parse_european_and_us_amounts() {
        assert_eq!(parse_number("1.234,56"), Some(1234.56));
        assert_eq!(parse_number("1,234.56"), Some(1234.56));
        assert_eq!(parse_number("1234,5"), Some(1234.5));
        assert_eq!(parse_number("1,234"), Some(1234.0));
        assert_eq!(parse_number("€ 99"), Some(99.0));
    }

    #[test]
    fn parse_plain_decimals() {
        assert_eq!(parse_number("3.5"), Some(3.5));
        assert_eq!(parse_number("0.125"), Some(0.125));
        assert_eq!(parse_number("19"), Some(19.0));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("$"), None);
        assert_eq!(parse_number("N/A"), None);
    }

    #[test]
    fn total_ignores_subtotal() {
        let text = "Subtotal: $ 1.000.000\nSub Total 1.000.000\nTOTAL: $ 1.190.000";
        let header = extract_header(text);
        assert_eq!(header.subtotal, Some(1_000_000.0));
        assert_eq!(header.total, Some(1_190_000.0));
    }

    #[test]
    fn tax_rate_and_amount_are_separate() {
        let header = extract_header("IVA 19%: $ 190.000");
        assert_eq!(header.tax_rate, Some(19.0));
        assert_eq!(header.tax_amount, Some(190_000.0));

        let header = extract_header("IVA 19%");
        assert_eq!(header.tax_rate, Some(19.0));
        assert_eq!(header.tax_amount, None);
    }

    #[test]
    fn values_do_not_span_lines() {
        let header = extract_header("COMUNA:\nSANTIAGO");
        assert_eq!(header.customer_district, None);
    }

    #[test]
    fn whitespace_inside_values_is_collapsed() {
        let header = extract_header("SEÑOR(ES): COMERCIAL ANDES LTDA\nCOMUNA: LAS\tCONDES");
        assert_eq!(header.customer_name.as_deref(), Some("COMERCIAL ANDES LTDA"));
        assert_eq!(header.customer_district.as_deref(), Some("LAS CONDES"));
    }

    #[test]
    fn first_pattern_wins() {
        let header = extract_header("FOLIO 999\nN° 4521");
        assert_eq!(header.invoice_number.as_deref(), Some("4521"));
    }

    #[test]
    fn unmatched_fields_stay_blank() {
        let header = extract_header("Nothing useful on this page at all.");
        assert_eq!(header.filled_fields(), 0);
    }

    #[test]
    fn supplier_and_customer_rut_use_their_blocks() {
        let text = "AGRICOLA SUR SPA\nR.U.T.: 76.123.456-7\nFACTURA ELECTRONICA\n\
                    SEÑOR(ES): COMERCIAL ANDES LTDA\nR.U.T.: 77.888.999-K";
        let header = extract_header(text);
        assert_eq!(header.supplier_tax_id.as_deref(), Some("76.123.456-7"));
        assert_eq!(header.customer_tax_id.as_deref(), Some("77.888.999-K"));
        assert_eq!(header.supplier_name.as_deref(), Some("AGRICOLA SUR SPA"));
    }

    #[test]
    fn lone_rut_is_not_duplicated_to_customer() {
        let header = extract_header("R.U.T.: 76.123.456-7");
        assert_eq!(header.supplier_tax_id.as_deref(), Some("76.123.456-7"));
        assert_eq!(header.customer_tax_id, None);
    }

    #[test]
    fn item_line_with_unit_and_total() {
        let item = parse_item_line("2 UN Tornillo hexagonal 3/8 1.500 3.000").unwrap();
        assert_eq!(item.quantity, Some(2.0));
        assert_eq!(item.unit.as_deref(), Some("UN"));
        assert_eq!(item.description.as_deref(), Some("Tornillo hexagonal 3/8"));
        assert_eq!(item.unit_price, Some(1500.0));
        assert_eq!(item.total, Some(3000.0));
    }

    #[test]
    fn item_line_with_code() {
        let item = parse_item_line("10 KG AB-1023 Fertilizante NPK 2.100 21.000").unwrap();
        assert_eq!(item.code.as_deref(), Some("AB-1023"));
        assert_eq!(item.description.as_deref(), Some("Fertilizante NPK"));
    }

    #[test]
    fn item_total_is_computed_when_missing() {
        let items = extract_line_items("DETALLE\n1 Servicio de flete 45.000\nTOTAL 45.000");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].unit_price, Some(45_000.0));
        assert_eq!(items[0].total, Some(45_000.0));
    }

    #[test]
    fn loose_lines_fall_back_to_number_positions() {
        let item = parse_item_line("Arriendo bodega mensual 1,5 120.000 180.000").unwrap();
        assert_eq!(item.description.as_deref(), Some("Arriendo bodega mensual"));
        assert_eq!(item.total, Some(180_000.0));
        assert_eq!(item.unit_price, Some(120_000.0));
        assert_eq!(item.quantity, Some(1.5));
    }

    #[test]
    fn short_and_label_lines_are_not_items() {
        let items = extract_line_items("R.U.T.: 76.123.456-7\nIVA 19% 190.000\n1,5 kg");
        assert!(items.is_empty());
    }
}
