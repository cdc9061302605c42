//! Derivación de campos estructurados (contacto, productos, FAQs) a partir
//! del texto extraído de una fuente.
//!
//! Dos estrategias intercambiables detrás del trait `FieldParser`:
//! heurísticas con regex (siempre disponibles, sin llamadas externas) y
//! extracción vía LLM (mejor calidad, requiere clave). La selección depende
//! de la configuración, no de ramas en los llamantes. Un fallo de extracción
//! nunca aborta el procesado del item: la categoría afectada queda vacía.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::config::{AppConfig, LlmProvider};
use crate::llm::ModelGateway;
use crate::models::{ExtractedFields, FaqEntry, Product};

#[async_trait]
pub trait FieldParser: Send + Sync {
    /// Deriva los campos estructurados de un texto. Infalible por contrato:
    /// las categorías que no se puedan obtener quedan como listas vacías.
    async fn parse_fields(&self, text: &str) -> ExtractedFields;
}

/// Construye la estrategia según configuración: LLM si hay clave compartida
/// con el proveedor OpenAI, regex en caso contrario.
pub fn parser_from_config(cfg: &AppConfig, gateway: Arc<dyn ModelGateway>) -> Arc<dyn FieldParser> {
    if cfg.openai_api_key.is_some() && cfg.llm_provider == LlmProvider::OpenAI {
        Arc::new(LlmFieldParser::new(gateway, cfg.llm_chat_model.clone()))
    } else {
        Arc::new(RegexFieldParser::new())
    }
}

// ---------------------------------------------------------------------
// Estrategia regex
// ---------------------------------------------------------------------

pub struct RegexFieldParser {
    email: Regex,
    phone: Regex,
    address: Regex,
}

impl RegexFieldParser {
    pub fn new() -> Self {
        Self {
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .expect("regex válida"),
            // Tolerante con separadores y prefijo de país opcional.
            phone: Regex::new(
                r"(?:\+\d{1,3}[ .-]?)?(?:\(\d{1,4}\)[ .-]?)?\d{2,5}(?:[ .-]\d{2,5}){1,3}|\+?\d{9,12}",
            )
            .expect("regex válida"),
            // Anclada en sufijos de vía comunes.
            address: Regex::new(
                r"\d{1,5}\s+(?:[A-Z][A-Za-z']*\s+){1,4}(?:Avenue|Ave|Street|St|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Place|Pl|Square|Sq|Way)\b\.?",
            )
            .expect("regex válida"),
        }
    }
}

impl Default for RegexFieldParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Deduplica conservando el orden de aparición (semántica de conjunto).
fn dedup(matches: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    matches.filter(|m| seen.insert(m.clone())).collect()
}

#[async_trait]
impl FieldParser for RegexFieldParser {
    async fn parse_fields(&self, text: &str) -> ExtractedFields {
        let emails = dedup(self.email.find_iter(text).map(|m| m.as_str().to_string()));
        let phones = dedup(
            self.phone
                .find_iter(text)
                .map(|m| m.as_str().trim().to_string())
                // Corta falsos positivos tipo "12 34": un teléfono real
                // tiene al menos siete dígitos.
                .filter(|m| m.chars().filter(char::is_ascii_digit).count() >= 7),
        );
        let addresses = dedup(
            self.address
                .find_iter(text)
                .map(|m| m.as_str().trim_end_matches('.').to_string()),
        );

        // La estrategia regex no intenta productos ni FAQs: requieren
        // comprensión del texto, no patrones léxicos.
        ExtractedFields {
            emails,
            phones,
            addresses,
            ..ExtractedFields::default()
        }
    }
}

// ---------------------------------------------------------------------
// Estrategia LLM
// ---------------------------------------------------------------------

const CONTACT_PROMPT: &str = "\
Extract contact information from the text the user provides.
Reply with ONLY a raw JSON object, no prose and no code fences, shaped \
exactly like: {\"emails\": [], \"phones\": [], \"addresses\": []}.
Each entry must appear verbatim as written in the text. If a category is \
absent, return it as an empty list.";

const PRODUCTS_PROMPT: &str = "\
Extract the products or services offered in the text the user provides.
Reply with ONLY a raw JSON array, no prose and no code fences, of objects \
shaped exactly like: {\"name\": \"\", \"price\": \"\", \"description\": \"\"}.
Omit price or description when the text does not state them. If there are \
no products or services, return [].";

const FAQS_PROMPT: &str = "\
Extract frequently asked questions and their answers from the text the \
user provides.
Reply with ONLY a raw JSON array, no prose and no code fences, of objects \
shaped exactly like: {\"question\": \"\", \"answer\": \"\"}.
If there are no question/answer pairs, return [].";

#[derive(Debug, Default, Deserialize)]
struct ContactJson {
    #[serde(default)]
    emails: Vec<String>,
    #[serde(default)]
    phones: Vec<String>,
    #[serde(default)]
    addresses: Vec<String>,
}

pub struct LlmFieldParser {
    gateway: Arc<dyn ModelGateway>,
    model: String,
}

impl LlmFieldParser {
    pub fn new(gateway: Arc<dyn ModelGateway>, model: String) -> Self {
        Self { gateway, model }
    }

    /// Lanza un prompt de categoría y parsea su JSON. Cualquier fallo (red,
    /// JSON malformado) devuelve el valor por defecto de la categoría.
    async fn extract_category<T>(&self, prompt: &str, text: &str, category: &str) -> T
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        let response = match self
            .gateway
            .complete(&self.model, None, prompt, &[], text)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("Extracción de '{category}' fallida, se usa el valor vacío: {err}");
                return T::default();
            }
        };

        let json = strip_code_fences(&response);
        match serde_json::from_str::<T>(json) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "JSON de '{category}' no parseable ({err}). Respuesta LLM: '{response}'"
                );
                T::default()
            }
        }
    }
}

/// Limpia un envoltorio accidental de bloque de código en la respuesta.
fn strip_code_fences(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[async_trait]
impl FieldParser for LlmFieldParser {
    async fn parse_fields(&self, text: &str) -> ExtractedFields {
        let contact: ContactJson = self.extract_category(CONTACT_PROMPT, text, "contacto").await;
        let products: Vec<Product> =
            self.extract_category(PRODUCTS_PROMPT, text, "productos").await;
        let faqs: Vec<FaqEntry> = self.extract_category(FAQS_PROMPT, text, "faqs").await;

        ExtractedFields {
            emails: contact.emails,
            phones: contact.phones,
            addresses: contact.addresses,
            products,
            faqs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedGateway;

    #[tokio::test]
    async fn regex_finds_emails_phones_and_addresses() {
        let parser = RegexFieldParser::new();
        let text = "Escríbenos a help@acme.com o ventas@acme.com. \
                    Teléfono: 01452 347 515 (int. +34 912 345 678). \
                    Oficina: 123 Main Street, Springfield.";

        let fields = parser.parse_fields(text).await;
        assert_eq!(fields.emails, vec!["help@acme.com", "ventas@acme.com"]);
        assert!(fields.phones.contains(&"01452 347 515".to_string()));
        assert!(fields.phones.iter().any(|p| p.contains("912 345 678")));
        assert_eq!(fields.addresses, vec!["123 Main Street"]);
        assert!(fields.products.is_empty());
        assert!(fields.faqs.is_empty());
    }

    #[tokio::test]
    async fn regex_deduplicates_matches() {
        let parser = RegexFieldParser::new();
        let text = "help@acme.com y de nuevo help@acme.com. 01452 347 515 / 01452 347 515";

        let fields = parser.parse_fields(text).await;
        assert_eq!(fields.emails.len(), 1);
        assert_eq!(fields.phones.len(), 1);
    }

    #[tokio::test]
    async fn regex_yields_empty_lists_without_matches() {
        let parser = RegexFieldParser::new();
        let fields = parser.parse_fields("Texto sin nada de contacto.").await;
        assert!(fields.is_empty());
    }

    #[tokio::test]
    async fn llm_parser_reads_all_three_categories() {
        let gateway = Arc::new(ScriptedGateway::new(
            None,
            vec![
                Ok(r#"{"emails":["help@acme.com"],"phones":["01452 347 515"],"addresses":[]}"#
                    .to_string()),
                Ok(r#"[{"name":"Taza","price":"12€","description":"Cerámica"}]"#.to_string()),
                Ok(r#"[{"question":"¿Envíos?","answer":"En 2 días."}]"#.to_string()),
            ],
        ));
        let parser = LlmFieldParser::new(gateway, "gpt-4o-mini".to_string());

        let fields = parser.parse_fields("da igual").await;
        assert_eq!(fields.emails, vec!["help@acme.com"]);
        assert_eq!(fields.phones, vec!["01452 347 515"]);
        assert_eq!(fields.products[0].name, "Taza");
        assert_eq!(fields.faqs[0].answer, "En 2 días.");
    }

    #[tokio::test]
    async fn llm_parser_strips_code_fences() {
        let gateway = Arc::new(ScriptedGateway::new(
            None,
            vec![
                Ok("```json\n{\"emails\":[\"a@b.com\"],\"phones\":[],\"addresses\":[]}\n```"
                    .to_string()),
                Ok("```json\n[]\n```".to_string()),
                Ok("[]".to_string()),
            ],
        ));
        let parser = LlmFieldParser::new(gateway, "gpt-4o-mini".to_string());

        let fields = parser.parse_fields("da igual").await;
        assert_eq!(fields.emails, vec!["a@b.com"]);
    }

    #[tokio::test]
    async fn llm_failures_default_to_empty_categories() {
        let gateway = Arc::new(ScriptedGateway::new(
            None,
            vec![
                Err("timeout".to_string()),
                Ok("esto no es JSON".to_string()),
                Ok("[]".to_string()),
            ],
        ));
        let parser = LlmFieldParser::new(gateway, "gpt-4o-mini".to_string());

        let fields = parser.parse_fields("da igual").await;
        assert!(fields.is_empty());
    }
}
