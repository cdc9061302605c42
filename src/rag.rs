//! Orquestador de respuesta: por cada turno de usuario embebe el mensaje,
//! recupera los items relevantes del cliente, compone el prompt de sistema
//! y lanza una única llamada de completado.
//!
//! Flujo por mensaje entrante:
//!   1. Embedding del mensaje (omisible, no fatal).
//!   2. Recuperación top-K con respaldo al conjunto completo.
//!   3. Composición del prompt con la identidad del cliente.
//!   4. Generación; cualquier fallo devuelve la respuesta fija de disculpa.
//!
//! Cada invocación es independiente y sin estado: el historial lo aporta el
//! llamante y aquí no se persiste nada.

use tracing::{error, warn};

use crate::llm::ModelGateway;
use crate::models::{ChatMessage, Client, TrainingItem};
use crate::prompt;
use crate::store::KnowledgeStore;

/// Respuesta fija ante un fallo de la llamada de completado. Nunca se expone
/// el error crudo al chat.
pub const FALLBACK_REPLY: &str =
    "Sorry, I'm having trouble connecting right now. Please try again later.";

/// Respuesta fija cuando el modelo devuelve una respuesta vacía.
pub const EMPTY_REPLY: &str = "Sorry, I couldn't generate a response.";

/// Modelo de chat usado cuando el cliente no ha elegido ninguno.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

/// Cuántos items recupera la búsqueda por similitud.
pub const TOP_K: usize = 3;

/// Responde a un mensaje de usuario para un cliente ya resuelto. Infalible
/// por contrato: todos los fallos internos degradan a una respuesta fija.
/// Una sola llamada al modelo por turno, sin reintentos.
pub async fn answer(
    store: &dyn KnowledgeStore,
    gateway: &dyn ModelGateway,
    client: &Client,
    message: &str,
    history: &[ChatMessage],
) -> String {
    let api_key = client.api_key.as_deref();

    let query_embedding = gateway.embed(message, api_key).await;
    let candidates = retrieve_candidates(store, client, query_embedding.as_deref()).await;

    let system_prompt = prompt::compose(&client.name, &candidates);

    let model = if client.model.is_empty() {
        DEFAULT_CHAT_MODEL
    } else {
        client.model.as_str()
    };

    match gateway
        .complete(model, api_key, &system_prompt, history, message)
        .await
    {
        Ok(reply) if !reply.trim().is_empty() => reply,
        Ok(_) => EMPTY_REPLY.to_string(),
        Err(err) => {
            error!("Fallo en la llamada de completado para {}: {err}", client.id);
            FALLBACK_REPLY.to_string()
        }
    }
}

/// Cadena explícita de recuperación, evaluada en orden:
///   1. búsqueda vectorial top-K (requiere embedding del mensaje);
///   2. conjunto completo del cliente, sin ordenar.
/// Ambas formas se tratan aguas abajo igual: una lista de candidatos.
async fn retrieve_candidates(
    store: &dyn KnowledgeStore,
    client: &Client,
    query_embedding: Option<&[f64]>,
) -> Vec<TrainingItem> {
    if let Some(vector) = query_embedding {
        match store.search(&client.id, vector, TOP_K).await {
            Ok(ranked) if !ranked.is_empty() => return ranked,
            Ok(_) => warn!(
                "Búsqueda vectorial sin resultados para {}, se usa el conjunto completo.",
                client.id
            ),
            Err(err) => warn!(
                "Búsqueda vectorial fallida para {} ({err}), se usa el conjunto completo.",
                client.id
            ),
        }
    }

    match store.items_for_client(&client.id).await {
        Ok(all) => all
            .into_iter()
            .filter(|item| !item.content.trim().is_empty())
            .collect(),
        Err(err) => {
            error!("No se pudieron leer los items del cliente {}: {err}", client.id);
            Vec::new()
        }
    }
}
