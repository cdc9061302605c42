//! Modelos de dominio: clientes, fuentes de entrenamiento y mensajes de chat.

use serde::{Deserialize, Serialize};

/// Tipo de fuente de una pieza de conocimiento registrada por el panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Url,
    Pdf,
    Text,
    Table,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Table => "table",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "url" => Some(Self::Url),
            "pdf" => Some(Self::Pdf),
            "text" => Some(Self::Text),
            "table" => Some(Self::Table),
            _ => None,
        }
    }
}

/// Un negocio cliente (tenant). Lo crea el panel de administración; este
/// servicio sólo lo lee.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub website: String,
    /// Modelo de chat elegido por el cliente; vacío → modelo por defecto.
    pub model: String,
    /// Clave de API propia del cliente; si falta se usa la compartida.
    pub api_key: Option<String>,
    pub created_at: String,
}

/// Una fuente de conocimiento perteneciente a exactamente un cliente.
///
/// El contenido se reemplaza en bloque al (re)procesar, nunca se parchea.
#[derive(Debug, Clone)]
pub struct TrainingItem {
    pub id: String,
    pub client_id: String,
    pub source_type: SourceType,
    pub name: String,
    pub url: Option<String>,
    pub file_url: Option<String>,
    pub content: String,
    pub embedding: Option<Vec<f64>>,
    /// Id del item padre cuando éste es un item derivado (faceta extraída).
    pub derived_from: Option<String>,
    /// Marca de procesado: si está presente, la ingesta omite el item.
    pub processed_at: Option<String>,
    pub created_at: String,
}

impl TrainingItem {
    pub fn is_derived(&self) -> bool {
        self.derived_from.is_some()
    }
}

/// Producto o servicio detectado en el texto de una fuente.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Pregunta frecuente detectada en el texto de una fuente.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

/// Campos estructurados derivados del texto extraído. Estructura efímera:
/// nunca se persiste tal cual, sólo plegada en el bloque formateado.
/// Toda lista ausente vale lista vacía; la falta de una categoría no es error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub faqs: Vec<FaqEntry>,
}

impl ExtractedFields {
    pub fn has_contact(&self) -> bool {
        !self.emails.is_empty() || !self.phones.is_empty() || !self.addresses.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_contact() && self.products.is_empty() && self.faqs.is_empty()
    }
}

/// Rol de un mensaje del historial de chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Mensaje transitorio del historial de una conversación. El historial lo
/// aporta el llamante en cada turno; el servicio no guarda sesiones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}
