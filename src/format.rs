//! Ensamblado del bloque de texto canónico de un item: cabecera, contenido
//! principal y secciones etiquetadas de campos estructurados.
//!
//! Las etiquetas y separadores son parte del contrato: el panel y el
//! compositor de prompts trocean los bloques por sección con `"\n\n"`.
//! Una sección sólo aparece si su lista correspondiente no está vacía, para
//! mantener compactos los prompts.

use crate::extract::collapse_whitespace;
use crate::models::{ExtractedFields, TrainingItem};

pub const MAIN_CONTENT_LABEL: &str = "MAIN CONTENT:";
pub const CONTACT_LABEL: &str = "CONTACT INFORMATION:";
pub const PRODUCTS_LABEL: &str = "PRODUCTS/SERVICES:";
pub const FAQS_LABEL: &str = "FREQUENTLY ASKED QUESTIONS:";

/// Construye el bloque anotado completo de un item. Es a la vez el campo
/// `content` durable y el texto que se entrega al embedder.
pub fn format_content(item: &TrainingItem, main_text: &str, fields: &ExtractedFields) -> String {
    let mut sections = Vec::new();

    let mut header = format!("Title: {}", item.name);
    if let Some(source) = item.url.as_deref().or(item.file_url.as_deref()) {
        header.push_str(&format!("\nSource: {source}"));
    }
    sections.push(header);

    sections.push(main_section(main_text));

    if let Some(contact) = contact_section(fields) {
        sections.push(contact);
    }
    if let Some(products) = products_section(fields) {
        sections.push(products);
    }
    if let Some(faqs) = faqs_section(fields) {
        sections.push(faqs);
    }

    sections.join("\n\n")
}

/// Sección de contenido principal. Se colapsan las líneas en blanco internas
/// para que el troceo por `"\n\n"` no parta la sección.
pub fn main_section(main_text: &str) -> String {
    format!("{MAIN_CONTENT_LABEL}\n{}", collapse_whitespace(main_text))
}

pub fn contact_section(fields: &ExtractedFields) -> Option<String> {
    if !fields.has_contact() {
        return None;
    }
    let mut lines = vec![CONTACT_LABEL.to_string()];
    if !fields.emails.is_empty() {
        lines.push(format!("Emails: {}", fields.emails.join(", ")));
    }
    if !fields.phones.is_empty() {
        lines.push(format!("Phone Numbers: {}", fields.phones.join(", ")));
    }
    if !fields.addresses.is_empty() {
        lines.push(format!("Addresses: {}", fields.addresses.join("; ")));
    }
    Some(lines.join("\n"))
}

pub fn products_section(fields: &ExtractedFields) -> Option<String> {
    if fields.products.is_empty() {
        return None;
    }
    let mut lines = vec![PRODUCTS_LABEL.to_string()];
    for product in &fields.products {
        let mut line = format!("- {}", product.name);
        if let Some(price) = product.price.as_deref().filter(|p| !p.is_empty()) {
            line.push_str(&format!(" ({price})"));
        }
        if let Some(description) = product.description.as_deref().filter(|d| !d.is_empty()) {
            line.push_str(&format!(" Description: {description}"));
        }
        lines.push(line);
    }
    Some(lines.join("\n"))
}

pub fn faqs_section(fields: &ExtractedFields) -> Option<String> {
    if fields.faqs.is_empty() {
        return None;
    }
    let pairs: Vec<String> = fields
        .faqs
        .iter()
        .map(|faq| format!("Q: {}\nA: {}", faq.question, faq.answer))
        .collect();
    Some(format!("{FAQS_LABEL}\n{}", pairs.join("\n\n")))
}
