//! Estado compartido de la aplicación, construido una vez en el arranque e
//! inyectado en los handlers. Las dependencias externas (almacén, modelos,
//! extracción) viajan detrás de sus traits para permitir dobles en tests.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::extract::Extractor;
use crate::fields::FieldParser;
use crate::llm::ModelGateway;
use crate::store::KnowledgeStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn KnowledgeStore>,
    pub gateway: Arc<dyn ModelGateway>,
    pub field_parser: Arc<dyn FieldParser>,
    pub extractor: Arc<Extractor>,
}
