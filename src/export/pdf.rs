//! Minimal single-page PDF 1.4 writer for invoice documents.
//!
//! Text uses the standard Helvetica faces with WinAnsiEncoding, so no fonts
//! are embedded. Characters outside Latin-1 are written as `?`.

use std::fmt::Write as _;

use super::{InvoiceDocument, InvoiceRow};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 56.0;
const VALUE_COLUMN: f32 = 210.0;
const ROW_HEIGHT: f32 = 16.0;
/// Accent colour of the title block (76, 201, 240).
const ACCENT: (f32, f32, f32) = (0.298, 0.788, 0.941);

/// Encode `text` as an escaped PDF literal string body.
fn pdf_string(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(ch as u8);
            }
            c if (c as u32) < 0x20 => out.push(b' '),
            c if (c as u32) < 0x80 => out.push(c as u8),
            c if (0xA0..=0xFF).contains(&(c as u32)) => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

/// Rough Helvetica advance width, enough to centre a heading.
fn approx_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * 0.55
}

struct Content {
    bytes: Vec<u8>,
}

impl Content {
    fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    fn op(&mut self, line: &str) {
        self.bytes.extend_from_slice(line.as_bytes());
        self.bytes.push(b'\n');
    }

    fn text(&mut self, font: &str, size: f32, x: f32, y: f32, text: &str) {
        self.op("BT");
        self.op(&format!("/{} {} Tf", font, size));
        self.op(&format!("{:.2} {:.2} Td", x, y));
        self.bytes.push(b'(');
        self.bytes.extend(pdf_string(text));
        self.bytes.extend_from_slice(b") Tj\n");
        self.op("ET");
    }

    fn fill_rgb(&mut self, (r, g, b): (f32, f32, f32)) {
        self.op(&format!("{:.3} {:.3} {:.3} rg", r, g, b));
    }

    fn stroke_rgb(&mut self, (r, g, b): (f32, f32, f32)) {
        self.op(&format!("{:.3} {:.3} {:.3} RG", r, g, b));
    }

    fn line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32) {
        self.op(&format!("{:.2} {:.2} m {:.2} {:.2} l S", x1, y1, x2, y2));
    }
}

fn page_content(doc: &InvoiceDocument) -> Vec<u8> {
    let mut c = Content::new();

    let mut y = PAGE_HEIGHT - 80.0;
    c.fill_rgb(ACCENT);
    c.text(
        "F2",
        22.0,
        (PAGE_WIDTH - approx_width(&doc.title, 22.0)) / 2.0,
        y,
        &doc.title,
    );
    y -= 12.0;
    c.stroke_rgb(ACCENT);
    c.line(MARGIN, y, PAGE_WIDTH - MARGIN, y);

    c.fill_rgb((0.4, 0.4, 0.4));
    y -= 24.0;
    c.text("F1", 10.0, MARGIN, y, &format!("Data de Emissão: {}", doc.issued_on));
    y -= 14.0;
    c.text("F1", 10.0, MARGIN, y, &format!("Referência: {}", doc.reference));

    c.fill_rgb((0.0, 0.0, 0.0));
    y -= 30.0;
    for row in &doc.rows {
        match row {
            InvoiceRow::Section(title) => c.text("F2", 10.0, MARGIN, y, title),
            InvoiceRow::Field { label, value } => {
                c.text("F2", 10.0, MARGIN, y, label);
                c.text("F1", 10.0, VALUE_COLUMN, y, value);
            }
            InvoiceRow::Spacer => {}
        }
        y -= ROW_HEIGHT;
    }

    c.fill_rgb((0.5, 0.5, 0.5));
    c.text("F1", 8.0, MARGIN, MARGIN, &doc.footer);
    c.bytes
}

/// Serialize `doc` as a complete PDF file.
pub fn render(doc: &InvoiceDocument) -> Vec<u8> {
    let content = page_content(doc);

    let mut objects: Vec<Vec<u8>> = Vec::new();
    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
    objects.push(b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_vec());
    objects.push(
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
             /Resources << /Font << /F1 4 0 R /F2 5 0 R >> >> /Contents 6 0 R >>",
            PAGE_WIDTH, PAGE_HEIGHT
        )
        .into_bytes(),
    );
    objects.push(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_vec(),
    );
    objects.push(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
            .to_vec(),
    );
    let mut stream = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
    stream.extend_from_slice(&content);
    stream.extend_from_slice(b"\nendstream");
    objects.push(stream);

    let mut out: Vec<u8> = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_at = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in &offsets {
        let _ = writeln!(xref, "{:010} 00000 n ", offset);
    }
    let _ = write!(
        xref,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_at
    );
    out.extend_from_slice(xref.as_bytes());
    out
}
