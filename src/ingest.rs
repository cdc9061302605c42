//! Canalización de ingesta: recorre los items de un cliente, extrae texto,
//! deriva campos estructurados, formatea el bloque canónico, calcula el
//! embedding y persiste el resultado, creando además items derivados por
//! faceta para afinar la recuperación.
//!
//! El bucle es secuencial y con aislamiento de fallos por item: un fallo de
//! red o un documento malformado se registra y se sigue con el siguiente.
//! La escritura de cada item es única y va la última, tras completar la
//! secuencia extraer + analizar + formatear + embedir y tras crear sus
//! items derivados: un item marcado como procesado tiene sus facetas.

use anyhow::{anyhow, Result};
use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::extract::Extractor;
use crate::fields::FieldParser;
use crate::format;
use crate::llm::ModelGateway;
use crate::models::{Client, ExtractedFields, SourceType, TrainingItem};
use crate::store::KnowledgeStore;

/// Resumen de los resultados de una pasada de procesado.
#[derive(Debug, Default)]
pub struct ProcessingSummary {
    pub items_processed: u32,
    pub items_skipped: u32,
    pub items_failed: u32,
    pub derived_created: u32,
    pub processed_item_ids: Vec<String>,
}

impl std::fmt::Display for ProcessingSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} items procesados, {} omitidos, {} fallidos. {} items derivados creados.",
            self.items_processed, self.items_skipped, self.items_failed, self.derived_created
        )
    }
}

/// Procesa todas las fuentes pendientes de un cliente. Reprocesar es un
/// trabajo cooperativo y reanudable: los items ya marcados como procesados
/// se omiten, y los que fallen hoy se reintentarán en la próxima pasada.
pub async fn process_training(
    store: &dyn KnowledgeStore,
    gateway: &dyn ModelGateway,
    extractor: &Extractor,
    parser: &dyn FieldParser,
    client: &Client,
) -> Result<ProcessingSummary> {
    let items = store.items_for_client(&client.id).await?;
    let mut summary = ProcessingSummary::default();

    for item in &items {
        if item.processed_at.is_some() {
            debug!("Item {} ya procesado, se omite.", item.id);
            summary.items_skipped += 1;
            continue;
        }

        match process_item(store, gateway, extractor, parser, client, item).await {
            Ok(derived) => {
                summary.items_processed += 1;
                summary.derived_created += derived;
                summary.processed_item_ids.push(item.id.clone());
            }
            Err(err) => {
                error!("Error procesando el item {} ({}): {err}", item.id, item.name);
                summary.items_failed += 1;
            }
        }
    }

    info!("Procesado del cliente {} terminado. {summary}", client.id);
    Ok(summary)
}

/// Procesa un item individual. Devuelve cuántos items derivados se crearon.
async fn process_item(
    store: &dyn KnowledgeStore,
    gateway: &dyn ModelGateway,
    extractor: &Extractor,
    parser: &dyn FieldParser,
    client: &Client,
    item: &TrainingItem,
) -> Result<u32> {
    let text = extractor.extract(item).await?;
    if text.trim().is_empty() {
        return Err(anyhow!("La fuente no produjo texto útil"));
    }

    let fields = parser.parse_fields(&text).await;
    let formatted = format::format_content(item, &text, &fields);

    let api_key = client.api_key.as_deref();
    let embedding = gateway.embed(&formatted, api_key).await;

    // Los derivados del procesado anterior quedan obsoletos con el nuevo
    // contenido; se recrean desde cero para no acumular duplicados.
    let removed = store.delete_derived_of(&client.id, &item.id).await?;
    if removed > 0 {
        debug!("Eliminados {removed} items derivados obsoletos de {}", item.id);
    }

    let derived = if fields.is_empty() || item.is_derived() {
        0
    } else {
        spawn_derived_items(store, gateway, client, item, &text, &fields).await?
    };

    // La escritura del padre va la última: la marca de procesado sólo existe
    // cuando las facetas derivadas ya están en el almacén. Si una faceta
    // falla, el padre queda sin marcar y la próxima pasada lo reintenta
    // entero (el borrado inicial limpia las facetas parciales).
    store
        .update_item_content(&client.id, &item.id, &formatted, embedding.as_deref())
        .await?;

    info!(
        "Item {} procesado ({} caracteres, {} derivados).",
        item.id,
        formatted.len(),
        derived
    );
    Ok(derived)
}

/// Crea un item derivado de tipo texto por cada faceta extraída (contenido
/// principal, productos, FAQs), cada uno con su propio embedding, para que
/// la recuperación pueda apuntar a una faceta concreta con independencia de
/// la fuente original.
async fn spawn_derived_items(
    store: &dyn KnowledgeStore,
    gateway: &dyn ModelGateway,
    client: &Client,
    parent: &TrainingItem,
    main_text: &str,
    fields: &ExtractedFields,
) -> Result<u32> {
    let mut facets: Vec<(&str, String)> = vec![("main content", format::main_section(main_text))];
    if let Some(products) = format::products_section(fields) {
        facets.push(("products", products));
    }
    if let Some(faqs) = format::faqs_section(fields) {
        facets.push(("FAQs", faqs));
    }

    let api_key = client.api_key.as_deref();
    let mut created = 0;
    for (label, section) in facets {
        let content = format!("Title: {} ({label})\n\n{section}", parent.name);
        let embedding = gateway.embed(&content, api_key).await;
        let now = Utc::now().to_rfc3339();

        let derived = TrainingItem {
            id: Uuid::new_v4().to_string(),
            client_id: client.id.clone(),
            source_type: SourceType::Text,
            name: format!("{} ({label})", parent.name),
            url: None,
            file_url: None,
            content,
            embedding,
            derived_from: Some(parent.id.clone()),
            // Nace procesado: su contenido ya es el bloque final.
            processed_at: Some(now.clone()),
            created_at: now,
        };
        store.insert_item(&derived).await?;
        created += 1;
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::fields::RegexFieldParser;
    use crate::llm::testing::ScriptedGateway;
    use crate::store::{KnowledgeStore, MemoryStore};

    /// Almacén que delega en `MemoryStore` pero puede rechazar inserciones,
    /// para simular un fallo a mitad de la creación de facetas derivadas.
    struct FlakyInsertStore {
        inner: MemoryStore,
        fail_inserts: AtomicBool,
    }

    impl FlakyInsertStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                fail_inserts: AtomicBool::new(true),
            }
        }
    }

    #[async_trait::async_trait]
    impl KnowledgeStore for FlakyInsertStore {
        async fn ping(&self) -> anyhow::Result<()> {
            self.inner.ping().await
        }

        async fn get_client(&self, client_id: &str) -> anyhow::Result<Option<Client>> {
            self.inner.get_client(client_id).await
        }

        async fn items_for_client(&self, client_id: &str) -> anyhow::Result<Vec<TrainingItem>> {
            self.inner.items_for_client(client_id).await
        }

        async fn update_item_content(
            &self,
            client_id: &str,
            item_id: &str,
            content: &str,
            embedding: Option<&[f64]>,
        ) -> anyhow::Result<()> {
            self.inner
                .update_item_content(client_id, item_id, content, embedding)
                .await
        }

        async fn insert_item(&self, item: &TrainingItem) -> anyhow::Result<()> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(anyhow!("inserción rechazada"));
            }
            self.inner.insert_item(item).await
        }

        async fn delete_derived_of(
            &self,
            client_id: &str,
            parent_id: &str,
        ) -> anyhow::Result<usize> {
            self.inner.delete_derived_of(client_id, parent_id).await
        }

        async fn search(
            &self,
            client_id: &str,
            query_embedding: &[f64],
            k: usize,
        ) -> anyhow::Result<Vec<TrainingItem>> {
            self.inner.search(client_id, query_embedding, k).await
        }
    }

    fn client() -> Client {
        Client {
            id: "acme".to_string(),
            name: "Acme".to_string(),
            website: "https://acme.example".to_string(),
            model: String::new(),
            api_key: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    fn text_item(id: &str, content: &str) -> TrainingItem {
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
            processed_at: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    fn url_item(id: &str, url: &str) -> TrainingItem {
        TrainingItem {
            url: Some(url.to_string()),
            source_type: SourceType::Url,
            ..text_item(id, "")
        }
    }

    #[tokio::test]
    async fn text_item_gets_formatted_content_embedding_and_derived_facets() {
        let store = MemoryStore::new();
        store.add_client(client());
        store.add_item(text_item(
            "i1",
            "Acme ships in 2 days. Email: help@acme.com.",
        ));

        let gateway = ScriptedGateway::new(Some(vec![0.1; 4]), vec![]);
        let extractor = Extractor::new().unwrap();
        let parser = RegexFieldParser::new();

        let summary =
            process_training(&store, &gateway, &extractor, &parser, &client())
                .await
                .unwrap();

        assert_eq!(summary.items_processed, 1);
        assert_eq!(summary.processed_item_ids, vec!["i1"]);
        // Con contacto detectado se crea al menos la faceta de contenido.
        assert_eq!(summary.derived_created, 1);

        let stored = store.item("i1").unwrap();
        assert!(stored.content.contains("MAIN CONTENT:"));
        assert!(stored.content.contains("CONTACT INFORMATION:\nEmails: help@acme.com"));
        assert!(stored.embedding.is_some());
        assert!(stored.processed_at.is_some());

        let all = store.items_for_client("acme").await.unwrap();
        let derived: Vec<_> = all.iter().filter(|i| i.is_derived()).collect();
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].derived_from.as_deref(), Some("i1"));
        assert!(derived[0].processed_at.is_some());
    }

    #[tokio::test]
    async fn rerun_skips_processed_items_and_creates_no_duplicates() {
        let store = MemoryStore::new();
        store.add_client(client());
        store.add_item(text_item("i1", "Email: help@acme.com"));

        let gateway = ScriptedGateway::new(Some(vec![0.1; 4]), vec![]);
        let extractor = Extractor::new().unwrap();
        let parser = RegexFieldParser::new();

        let first = process_training(&store, &gateway, &extractor, &parser, &client())
            .await
            .unwrap();
        assert_eq!(first.items_processed, 1);
        let total_after_first = store.items_for_client("acme").await.unwrap().len();

        let second = process_training(&store, &gateway, &extractor, &parser, &client())
            .await
            .unwrap();
        assert_eq!(second.items_processed, 0);
        assert!(second.processed_item_ids.is_empty());
        // Padre + derivado, ambos omitidos; ningún duplicado nuevo.
        assert_eq!(second.items_skipped as usize, total_after_first);
        assert_eq!(
            store.items_for_client("acme").await.unwrap().len(),
            total_after_first
        );
    }

    #[tokio::test]
    async fn fetch_failure_skips_the_item_and_continues() {
        let store = MemoryStore::new();
        store.add_client(client());
        // Puerto de descarte: la conexión falla de inmediato.
        store.add_item(url_item("malo", "http://127.0.0.1:9/nada"));
        store.add_item(text_item("bueno", "Acme fabrica yunques."));

        let gateway = ScriptedGateway::new(Some(vec![0.1; 4]), vec![]);
        let extractor = Extractor::new().unwrap();
        let parser = RegexFieldParser::new();

        let summary = process_training(&store, &gateway, &extractor, &parser, &client())
            .await
            .unwrap();

        assert_eq!(summary.items_failed, 1);
        assert_eq!(summary.items_processed, 1);
        assert_eq!(summary.processed_item_ids, vec!["bueno"]);
        // El item fallido queda pendiente para la próxima pasada.
        assert!(store.item("malo").unwrap().processed_at.is_none());
    }

    #[tokio::test]
    async fn missing_locator_counts_as_failure_not_abort() {
        let store = MemoryStore::new();
        store.add_client(client());
        let mut sin_url = text_item("i1", "");
        sin_url.source_type = SourceType::Url;
        store.add_item(sin_url);

        let gateway = ScriptedGateway::new(Some(vec![0.1; 4]), vec![]);
        let extractor = Extractor::new().unwrap();
        let parser = RegexFieldParser::new();

        let summary = process_training(&store, &gateway, &extractor, &parser, &client())
            .await
            .unwrap();
        assert_eq!(summary.items_failed, 1);
        assert_eq!(summary.items_processed, 0);
    }

    #[tokio::test]
    async fn derived_insert_failure_leaves_parent_unprocessed_for_retry() {
        let store = FlakyInsertStore::new(MemoryStore::new());
        store.inner.add_client(client());
        store
            .inner
            .add_item(text_item("i1", "Email: help@acme.com"));

        let gateway = ScriptedGateway::new(Some(vec![0.1; 4]), vec![]);
        let extractor = Extractor::new().unwrap();
        let parser = RegexFieldParser::new();

        // Primera pasada: la inserción de la faceta falla, así que el padre
        // no debe quedar marcado como procesado.
        let first = process_training(&store, &gateway, &extractor, &parser, &client())
            .await
            .unwrap();
        assert_eq!(first.items_failed, 1);
        assert_eq!(first.items_processed, 0);
        assert!(store.inner.item("i1").unwrap().processed_at.is_none());
        let all = store.inner.items_for_client("acme").await.unwrap();
        assert!(all.iter().all(|i| !i.is_derived()));

        // Con el almacén recuperado, la segunda pasada reintenta el item
        // entero y crea las facetas.
        store.fail_inserts.store(false, Ordering::SeqCst);
        let second = process_training(&store, &gateway, &extractor, &parser, &client())
            .await
            .unwrap();
        assert_eq!(second.items_processed, 1);
        assert_eq!(second.derived_created, 1);
        assert!(store.inner.item("i1").unwrap().processed_at.is_some());
    }

    #[tokio::test]
    async fn embedding_failure_still_stores_formatted_content() {
        let store = MemoryStore::new();
        store.add_client(client());
        store.add_item(text_item("i1", "Acme fabrica yunques."));

        // Gateway sin embeddings: simula clave ausente o API caída.
        let gateway = ScriptedGateway::new(None, vec![]);
        let extractor = Extractor::new().unwrap();
        let parser = RegexFieldParser::new();

        let summary = process_training(&store, &gateway, &extractor, &parser, &client())
            .await
            .unwrap();
        assert_eq!(summary.items_processed, 1);

        let stored = store.item("i1").unwrap();
        assert!(stored.content.contains("MAIN CONTENT:"));
        assert!(stored.embedding.is_none());
    }
}
