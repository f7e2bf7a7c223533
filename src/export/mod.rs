//! Invoice export for agenda events.
//!
//! An [`InvoiceDocument`] is the fixed template (title block, key-value
//! rows, footer) filled from one event and the business identity constants.
//! A [`DocumentExporter`] turns it into a file. Event fields are not
//! validated; missing ones render as placeholders.

pub mod pdf;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ExportError;
use crate::types::Event;

pub const INVOICE_TITLE: &str = "NOTA DE HONORÁRIOS";
pub const PROVIDER_NAME: &str = "Noile Xel";
pub const CLIENT_NAME: &str = "CLIENTE FINAL - COMERCIO & SERVIÇOS, LDA";
pub const CLIENT_TAX_ID: &str = "000000000";
pub const CLIENT_ADDRESS: &str = "Luanda, Angola";
pub const FOOTER: &str =
    "Documento gerado automaticamente pelo painel Noile Xel. Valores em Kwanzas (Kz).";

const MISSING: &str = "---";

#[derive(Debug, Clone, PartialEq)]
pub enum InvoiceRow {
    Section(String),
    Field { label: String, value: String },
    Spacer,
}

fn field(label: &str, value: impl Into<String>) -> InvoiceRow {
    InvoiceRow::Field {
        label: label.to_string(),
        value: value.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceDocument {
    pub file_name: String,
    pub title: String,
    pub issued_on: String,
    pub reference: String,
    pub rows: Vec<InvoiceRow>,
    pub footer: String,
}

impl InvoiceDocument {
    pub fn for_event(event: &Event, issued_at: DateTime<Utc>) -> Self {
        let event_date = event
            .date
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_else(|| MISSING.to_string());
        let location = event
            .location
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or("N/A");
        let total = match event.value {
            Some(v) => format!("{} Kz", format_amount(v)),
            None => format!("{} Kz", MISSING),
        };

        let rows = vec![
            InvoiceRow::Section("DADOS DO PRESTADOR".into()),
            field("Nome", PROVIDER_NAME),
            InvoiceRow::Spacer,
            InvoiceRow::Section("DADOS DO CLIENTE".into()),
            field("Razão Social", CLIENT_NAME),
            field("NIF", CLIENT_TAX_ID),
            field("Morada", CLIENT_ADDRESS),
            InvoiceRow::Spacer,
            InvoiceRow::Section("DETALHES DO SERVIÇO".into()),
            field("Evento", event.title.clone()),
            field("Data do Evento", event_date),
            field("Local", location),
            field("VALOR TOTAL", total),
        ];

        Self {
            file_name: invoice_file_name(&event.title),
            title: INVOICE_TITLE.to_string(),
            issued_on: issued_at.format("%d/%m/%Y").to_string(),
            reference: format!("INV-{}", issued_at.timestamp_millis()),
            rows,
            footer: FOOTER.to_string(),
        }
    }
}

/// Characters no file name may carry on any of the platforms we write to.
const RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// `Fatura_<title>.pdf` with every whitespace character replaced by `_`.
///
/// Path separators, reserved and control characters become `_` as well, so
/// the result is always a single component inside the export directory.
pub fn invoice_file_name(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| {
            if c.is_whitespace() || c.is_control() || RESERVED.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();
    format!("Fatura_{}.pdf", stem)
}

/// Whole amounts with space-grouped thousands, two decimals otherwise.
pub fn format_amount(value: f64) -> String {
    if !value.is_finite() {
        return MISSING.to_string();
    }
    let negative = value < 0.0;
    let abs = value.abs();
    let whole = abs.trunc() as u64;
    let cents = ((abs - abs.trunc()) * 100.0).round() as u64;
    let (whole, cents) = if cents == 100 { (whole + 1, 0) } else { (whole, cents) };

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }

    let sign = if negative { "-" } else { "" };
    if cents == 0 {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{},{:02}", sign, grouped, cents)
    }
}

#[async_trait]
pub trait DocumentExporter: Send + Sync {
    /// Write the document and return where it landed.
    async fn export(&self, document: &InvoiceDocument) -> Result<PathBuf, ExportError>;
}

/// Writes single-page PDFs into a directory.
pub struct PdfExporter {
    out_dir: PathBuf,
}

impl PdfExporter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

#[async_trait]
impl DocumentExporter for PdfExporter {
    async fn export(&self, document: &InvoiceDocument) -> Result<PathBuf, ExportError> {
        let bytes = pdf::render(document);
        let path = self.out_dir.join(&document.file_name);
        tokio::fs::create_dir_all(&self.out_dir).await?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ExportError::Persist {
                path: path.clone(),
                message: e.to_string(),
            })?;
        log::info!("Export: wrote {}", path.display());
        Ok(path)
    }
}
