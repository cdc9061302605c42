//! Frontera con los modelos de embeddings y chat, sobre Rig.
//!
//! La canalización depende del trait `ModelGateway`; la implementación real
//! usa el proveedor OpenAI de Rig (Gemini/Ollama quedan preparados para el
//! futuro). Cada llamada puede usar la clave propia del cliente o la clave
//! compartida por defecto; ambos caminos son idénticos.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::config::{AppConfig, LlmProvider};
use crate::models::{ChatMessage, ChatRole};

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Calcula el embedding de un texto. Devuelve `None` ante cualquier fallo
    /// (clave ausente, error de API, red) para que el llamante degrade a la
    /// recuperación sin vectores en vez de abortar.
    async fn embed(&self, text: &str, api_key: Option<&str>) -> Option<Vec<f64>>;

    /// Genera una respuesta de chat. El mensaje de sistema va aparte y es
    /// único; el historial sólo aporta turnos de usuario y asistente.
    async fn complete(
        &self,
        model: &str,
        api_key: Option<&str>,
        system_prompt: &str,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<String>;
}

/// Gateway de producción sobre los proveedores de Rig.
#[derive(Debug, Clone)]
pub struct OpenAiGateway {
    provider: LlmProvider,
    default_api_key: Option<String>,
    embedding_model: String,
}

impl OpenAiGateway {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            default_api_key: cfg.openai_api_key.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
        }
    }

    /// Clave del cliente si existe, si no la compartida.
    fn resolve_key(&self, api_key: Option<&str>) -> Result<String> {
        api_key
            .map(str::to_string)
            .or_else(|| self.default_api_key.clone())
            .ok_or_else(|| anyhow!("No hay clave de API configurada para el modelo"))
    }

    async fn embed_with_openai(&self, text: &str, key: &str) -> Result<Vec<f64>> {
        use rig::client::EmbeddingsClient as _;
        use rig::embeddings::EmbeddingModel as _;
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let client = openai::Client::new(key);
        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let embeddings = embedding_model.embed_texts(vec![text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .map(|e| e.vec)
            .ok_or_else(|| anyhow!("El modelo no devolvió ningún embedding"))
    }

    async fn complete_with_openai(
        &self,
        model: &str,
        key: &str,
        system_prompt: &str,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::completion::{Chat as _, Message};
        use rig::providers::openai;

        let client = openai::Client::new(key);
        let agent = client.agent(model).preamble(system_prompt).build();

        // El mensaje de sistema viaja como preámbulo; cualquier mensaje de
        // sistema colado en el historial se ignora para mantenerlo singular.
        let chat_history: Vec<Message> = history
            .iter()
            .filter_map(|m| match m.role {
                ChatRole::User => Some(Message::user(m.content.clone())),
                ChatRole::Assistant => Some(Message::assistant(m.content.clone())),
                ChatRole::System => None,
            })
            .collect();

        let answer = agent.chat(message, chat_history).await?;
        Ok(answer)
    }
}


#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn embed(&self, text: &str, api_key: Option<&str>) -> Option<Vec<f64>> {
        if !matches!(self.provider, LlmProvider::OpenAI) {
            warn!("Embeddings aún no implementados para {:?}", self.provider);
            return None;
        }
        let key = match self.resolve_key(api_key) {
            Ok(key) => key,
            Err(err) => {
                warn!("Embedding omitido: {err}");
                return None;
            }
        };
        match self.embed_with_openai(text, &key).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                warn!("Fallo calculando embedding: {err}");
                None
            }
        }
    }

    async fn complete(
        &self,
        model: &str,
        api_key: Option<&str>,
        system_prompt: &str,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => {
                let key = self.resolve_key(api_key)?;
                self.complete_with_openai(model, &key, system_prompt, history, message)
                    .await
            }
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }
}
