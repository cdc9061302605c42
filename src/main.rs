// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod extract;
mod fields;
mod format;
mod ingest;
mod llm;
mod models;
mod neo4j_store;
mod prompt;
mod rag;
mod store;

use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::extract::Extractor;
use crate::llm::{ModelGateway, OpenAiGateway};
use crate::neo4j_store::Neo4jStore;
use crate::store::KnowledgeStore;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Conectar al almacén de conocimiento y asegurar esquema e índice
    let neo4j = Neo4jStore::connect(&cfg)
        .await
        .expect("Error conectando a Neo4j");
    neo4j
        .ensure_schema()
        .await
        .expect("Error asegurando el esquema de Neo4j");
    neo4j
        .ensure_vector_index()
        .await
        .expect("Error asegurando el índice vectorial");
    let store: Arc<dyn KnowledgeStore> = Arc::new(neo4j);

    // 4. Inicializar el gateway de modelos y la estrategia de campos
    let gateway: Arc<dyn ModelGateway> = Arc::new(OpenAiGateway::from_config(&cfg));
    let field_parser = fields::parser_from_config(&cfg, gateway.clone());
    let extractor = Arc::new(Extractor::new().expect("Error inicializando el extractor"));

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        store,
        gateway,
        field_parser,
        extractor,
    };

    // 6. Configurar el router de la API
    let app = api::create_router(app_state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 7. Iniciar el servidor con apagado ordenado
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .expect("No se pudo abrir el puerto de escucha");
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("Error del servidor HTTP");

    info!("✅ Servidor cerrado correctamente.");
}
