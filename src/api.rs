//! Capa HTTP: rutas y handlers de la API del servicio.
//!
//! Política de propagación: sólo las precondiciones de toda la operación
//! (id de cliente ausente, cliente inexistente) salen como errores de la
//! petición; todo lo recuperable dentro del bucle por item o por turno se
//! resuelve aguas abajo y nunca llega aquí.

use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::{app_state::AppState, ingest, models::ChatMessage, rag};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTrainingPayload {
    #[serde(default)]
    client_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTrainingResponse {
    items_processed: u32,
    processed_item_ids: Vec<String>,
    items_skipped: u32,
    items_failed: u32,
    derived_items_created: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    message: String,
    #[serde(default)]
    client_id: String,
    /// Turnos previos de la conversación, aportados por el llamante.
    #[serde(default)]
    history: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    reply: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/process-training", post(process_training_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/health", get(health_handler))
        .with_state(app_state)
}

// --- Handlers ---

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found() -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Client not found" })))
}

/// Resuelve el cliente de la petición. Un cliente desconocido es un error de
/// configuración explícito (404), distinto de los fallos transitorios.
async fn resolve_client(state: &AppState, client_id: &str) -> Result<crate::models::Client, ApiError> {
    if client_id.trim().is_empty() {
        return Err(bad_request("Client ID is required"));
    }
    match state.store.get_client(client_id).await {
        Ok(Some(client)) => Ok(client),
        Ok(None) => Err(not_found()),
        Err(err) => {
            error!("Error consultando el cliente {client_id}: {err}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to fetch client" })),
            ))
        }
    }
}

#[axum::debug_handler]
async fn process_training_handler(
    State(state): State<AppState>,
    Json(payload): Json<ProcessTrainingPayload>,
) -> Result<Json<ProcessTrainingResponse>, ApiError> {
    let client = resolve_client(&state, &payload.client_id).await?;

    let summary = ingest::process_training(
        state.store.as_ref(),
        state.gateway.as_ref(),
        &state.extractor,
        state.field_parser.as_ref(),
        &client,
    )
    .await
    .map_err(|err| {
        error!("Error procesando el entrenamiento de {}: {err}", client.id);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to process training data", "details": err.to_string() })),
        )
    })?;

    Ok(Json(ProcessTrainingResponse {
        items_processed: summary.items_processed,
        processed_item_ids: summary.processed_item_ids,
        items_skipped: summary.items_skipped,
        items_failed: summary.items_failed,
        derived_items_created: summary.derived_created,
    }))
}

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(bad_request("Message is required"));
    }
    let client = resolve_client(&state, &payload.client_id).await?;

    // Infalible a partir de aquí: los fallos internos degradan a respuestas
    // fijas dentro del orquestador.
    let reply = rag::answer(
        state.store.as_ref(),
        state.gateway.as_ref(),
        &client,
        &payload.message,
        &payload.history,
    )
    .await;

    Ok(Json(ChatResponse { reply }))
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.store.ping().await {
        Ok(()) => Ok(Json(json!({ "status": "ok" }))),
        Err(err) => {
            error!("Error en el health check del almacén: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::config::{AppConfig, LlmProvider};
    use crate::extract::Extractor;
    use crate::fields::RegexFieldParser;
    use crate::llm::testing::ScriptedGateway;
    use crate::models::{Client, SourceType, TrainingItem};
    use crate::store::MemoryStore;

    fn state_with(store: MemoryStore, gateway: ScriptedGateway) -> AppState {
        AppState {
            config: AppConfig {
                neo4j_uri: "neo4j://localhost:7687".to_string(),
                neo4j_user: "neo4j".to_string(),
                neo4j_password: "password".to_string(),
                server_addr: "127.0.0.1:3322".to_string(),
                llm_provider: LlmProvider::OpenAI,
                openai_api_key: None,
                llm_embedding_model: "text-embedding-3-small".to_string(),
                llm_chat_model: "gpt-3.5-turbo".to_string(),
            },
            store: Arc::new(store),
            gateway: Arc::new(gateway),
            field_parser: Arc::new(RegexFieldParser::new()),
            extractor: Arc::new(Extractor::new().unwrap()),
        }
    }

    fn acme() -> Client {
        Client {
            id: "acme".to_string(),
            name: "Acme".to_string(),
            website: "https://acme.example".to_string(),
            model: String::new(),
            api_key: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    fn processed_item(id: &str, content: &str) -> TrainingItem {
        TrainingItem {
            id: id.to_string(),
            client_id: "acme".to_string(),
            source_type: SourceType::Text,
            name: format!("Nota {id}"),
            url: None,
            file_url: None,
            content: content.to_string(),
            embedding: None,
            derived_from: None,
            processed_at: Some(Utc::now().to_rfc3339()),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    fn chat_payload(client_id: &str, message: &str) -> ChatPayload {
        ChatPayload {
            message: message.to_string(),
            client_id: client_id.to_string(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn chat_with_unknown_client_returns_404() {
        let state = state_with(MemoryStore::new(), ScriptedGateway::new(None, vec![]));

        let (status, Json(body)) =
            chat_handler(State(state), Json(chat_payload("nadie", "hola")))
                .await
                .unwrap_err();

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Client not found");
    }

    #[tokio::test]
    async fn chat_with_blank_client_id_returns_400() {
        let state = state_with(MemoryStore::new(), ScriptedGateway::new(None, vec![]));

        let (status, Json(body)) =
            chat_handler(State(state), Json(chat_payload("  ", "hola")))
                .await
                .unwrap_err();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Client ID is required");
    }

    #[tokio::test]
    async fn chat_with_empty_message_returns_400() {
        let store = MemoryStore::new();
        store.add_client(acme());
        let state = state_with(store, ScriptedGateway::new(None, vec![]));

        let (status, Json(body)) =
            chat_handler(State(state), Json(chat_payload("acme", "   ")))
                .await
                .unwrap_err();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message is required");
    }

    #[tokio::test]
    async fn chat_with_known_client_replies() {
        let store = MemoryStore::new();
        store.add_client(acme());
        store.add_item(processed_item("i1", "Acme fabrica yunques."));
        let gateway = ScriptedGateway::new(None, vec![Ok("Yunques.".to_string())]);
        let state = state_with(store, gateway);

        let Json(response) =
            chat_handler(State(state), Json(chat_payload("acme", "¿qué fabricáis?")))
                .await
                .unwrap();

        assert_eq!(response.reply, "Yunques.");
    }

    #[tokio::test]
    async fn process_training_with_unknown_client_returns_404() {
        let state = state_with(MemoryStore::new(), ScriptedGateway::new(None, vec![]));
        let payload = ProcessTrainingPayload {
            client_id: "nadie".to_string(),
        };

        let (status, Json(body)) =
            process_training_handler(State(state), Json(payload))
                .await
                .unwrap_err();

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Client not found");
    }

    #[tokio::test]
    async fn health_reports_ok_with_a_live_store() {
        let state = state_with(MemoryStore::new(), ScriptedGateway::new(None, vec![]));

        let Json(body) = health_handler(State(state)).await.unwrap();
        assert_eq!(body["status"], "ok");
    }
}
