//! Extracción de texto plano a partir de fuentes heterogéneas (URL, PDF,
//! texto libre y tablas). Cada tipo tiene su propia rama; todas devuelven
//! texto limpio y acotado, listo para el análisis de campos y el formateo.

use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::models::{SourceType, TrainingItem};

/// Tope de caracteres del contenido principal, para acotar el consumo de
/// tokens aguas abajo.
pub const MAX_CONTENT_CHARS: usize = 8_000;

/// User-Agent de navegador: bastantes sitios devuelven 403 a clientes HTTP
/// genéricos.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Subárboles que no aportan contenido y se descartan antes de leer texto.
const EXCLUDED_TAGS: [&str; 6] = ["script", "style", "nav", "header", "footer", "noscript"];

pub struct Extractor {
    http: reqwest::Client,
}

impl Extractor {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .build()?;
        Ok(Self { http })
    }

    /// Convierte una fuente cruda en texto plano limpio. Los fallos de red o
    /// de parseo salen como `Err`; el bucle de ingesta los registra y sigue
    /// con el siguiente item.
    pub async fn extract(&self, item: &TrainingItem) -> Result<String> {
        let text = match item.source_type {
            SourceType::Url => {
                let url = item
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow!("El item {} no tiene URL de origen", item.id))?;
                let html = self.fetch_text(url).await?;
                html_to_text(&html)
            }
            SourceType::Pdf => {
                let url = locator(item)?;
                let bytes = self.fetch_bytes(url).await?;
                let raw = pdf_extract::extract_text_from_mem(&bytes)?;
                collapse_whitespace(&raw)
            }
            SourceType::Text => {
                // El contenido ya es el texto crudo.
                item.content.clone()
            }
            SourceType::Table => {
                let url = locator(item)?;
                let bytes = self.fetch_bytes(url).await?;
                let raw = String::from_utf8_lossy(&bytes);
                table_to_text(&raw)
            }
        };
        Ok(truncate_chars(&text, MAX_CONTENT_CHARS))
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

/// Localizador de descarga de un item: URL de fichero subido o URL directa.
fn locator(item: &TrainingItem) -> Result<&str> {
    item.file_url
        .as_deref()
        .or(item.url.as_deref())
        .ok_or_else(|| anyhow!("El item {} no tiene URL de descarga", item.id))
}

/// Extrae el texto legible de un documento HTML. Prefiere `<article>`, luego
/// `<main>` y finalmente el cuerpo completo, descartando los subárboles de
/// script/estilo/navegación.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut out = String::new();
    for pattern in ["article", "main", "body"] {
        let Ok(selector) = Selector::parse(pattern) else {
            continue;
        };
        if let Some(root) = document.select(&selector).next() {
            collect_text(root, &mut out);
            if !out.trim().is_empty() {
                debug!("Texto HTML extraído desde <{pattern}>");
                break;
            }
        }
    }

    collapse_whitespace(&out)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    if EXCLUDED_TAGS.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            collect_text(child_element, out);
            out.push('\n');
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}

/// Renderiza filas tabulares (CSV/TSV) como texto delimitado por barras.
/// La tabla se trata como texto no estructurado a efectos de recuperación;
/// es una simplificación deliberada.
pub fn table_to_text(raw: &str) -> String {
    let first_line = raw.lines().next().unwrap_or_default();
    let delimiter = if first_line.matches('\t').count() > first_line.matches(',').count() {
        '\t'
    } else if first_line.matches(';').count() > first_line.matches(',').count() {
        ';'
    } else {
        ','
    };

    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.split(delimiter)
                .map(|cell| cell.trim().trim_matches('"'))
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Colapsa rachas de espacios y de líneas en blanco, conservando los saltos
/// de línea como separador de párrafos.
pub fn collapse_whitespace(text: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    let spaces = SPACES.get_or_init(|| Regex::new(r"[ \t\r\f]+").expect("regex válida"));

    text.lines()
        .map(|line| spaces.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trunca en un límite de caracteres respetando las fronteras UTF-8.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
