//! Implementación del almacén de conocimiento sobre Neo4j.
//!
//! Esquema: nodos `(:Client)` y `(:TrainingItem)` unidos por
//! `[:HAS_TRAINING]`, con índice vectorial sobre `TrainingItem.embedding`.
//! Los items derivados añaden `[:DERIVED_FROM]` hacia su padre.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use neo4rs::{query, Graph, Row};
use tracing::info;
use url::Url;

use crate::config::AppConfig;
use crate::models::{Client, SourceType, TrainingItem};
use crate::store::KnowledgeStore;

const VECTOR_INDEX_NAME: &str = "trainingEmbeddingIndex";

/// Factor de sobremuestreo de la búsqueda vectorial: el índice es global,
/// así que se piden más candidatos y se filtra por cliente a posteriori.
const SCAN_FACTOR: usize = 20;

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    /// Conecta con Neo4j a partir de la configuración.
    pub async fn connect(cfg: &AppConfig) -> Result<Self> {
        let url = Url::parse(&cfg.neo4j_uri)?;
        let host = url.host_str().unwrap_or("localhost");
        let port = url.port().unwrap_or(7687);
        let addr = format!("{host}:{port}");

        info!("Conectando a Neo4j en {addr}...");
        let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
        info!("Conexión a Neo4j OK");
        Ok(Self { graph })
    }

    /// Crea constraints de unicidad para `:Client` y `:TrainingItem`.
    pub async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            "CREATE CONSTRAINT client_id IF NOT EXISTS
             FOR (c:Client)
             REQUIRE c.id IS UNIQUE",
            "CREATE CONSTRAINT training_item_id IF NOT EXISTS
             FOR (t:TrainingItem)
             REQUIRE t.id IS UNIQUE",
        ];

        for stmt in statements {
            self.graph.run(query(stmt)).await?;
        }

        info!("Esquema de Neo4j asegurado (constraints básicos creados).");
        Ok(())
    }

    /// Garantiza que el índice vectorial sobre `TrainingItem.embedding` exista.
    pub async fn ensure_vector_index(&self) -> Result<()> {
        let mut cursor = self
            .graph
            .execute(
                query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                    .param("name", VECTOR_INDEX_NAME),
            )
            .await?;

        if cursor.next().await?.is_some() {
            info!("Índice vectorial '{VECTOR_INDEX_NAME}' ya existe.");
            return Ok(());
        }

        let cypher = format!(
            "\
CREATE VECTOR INDEX {VECTOR_INDEX_NAME}
FOR (t:TrainingItem)
ON (t.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: 1536,
    `vector.similarity_function`: 'cosine'
  }}
}}"
        );

        self.graph.run(query(&cypher)).await?;
        info!("Índice vectorial '{VECTOR_INDEX_NAME}' creado.");
        Ok(())
    }

}

fn item_from_row(row: &Row) -> Result<TrainingItem> {
    let id: String = row
        .get("id")
        .ok_or_else(|| anyhow!("Falta campo 'id' en resultado de Neo4j"))?;
    let client_id: String = row
        .get("client_id")
        .ok_or_else(|| anyhow!("Falta campo 'client_id' en resultado de Neo4j"))?;
    let type_str: String = row.get("type").unwrap_or_default();
    let source_type = SourceType::parse(&type_str)
        .ok_or_else(|| anyhow!("Tipo de fuente desconocido en el item {id}: '{type_str}'"))?;

    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());

    Ok(TrainingItem {
        id,
        client_id,
        source_type,
        name: row.get("name").unwrap_or_default(),
        url: non_empty(row.get("url")),
        file_url: non_empty(row.get("file_url")),
        content: row.get("content").unwrap_or_default(),
        embedding: row.get("embedding"),
        derived_from: non_empty(row.get("derived_from")),
        processed_at: non_empty(row.get("processed_at")),
        created_at: row.get("created_at").unwrap_or_default(),
    })
}

const ITEM_RETURN: &str = "\
t.id AS id, t.client_id AS client_id, t.type AS type, t.name AS name,
t.url AS url, t.file_url AS file_url, t.content AS content,
t.embedding AS embedding, t.derived_from AS derived_from,
t.processed_at AS processed_at, t.created_at AS created_at";

#[async_trait]
impl KnowledgeStore for Neo4jStore {
    async fn ping(&self) -> Result<()> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (c:Client {id: $id})
                     RETURN c.id AS id, c.name AS name, c.website AS website,
                            c.model AS model, c.api_key AS api_key,
                            c.created_at AS created_at",
                )
                .param("id", client_id),
            )
            .await?;

        let Some(row) = cursor.next().await? else {
            return Ok(None);
        };

        let id: String = row
            .get("id")
            .ok_or_else(|| anyhow!("Falta campo 'id' en resultado de Neo4j"))?;
        Ok(Some(Client {
            id,
            name: row.get("name").unwrap_or_default(),
            website: row.get("website").unwrap_or_default(),
            model: row.get("model").unwrap_or_default(),
            api_key: row.get::<String>("api_key").filter(|k| !k.is_empty()),
            created_at: row.get("created_at").unwrap_or_default(),
        }))
    }

    async fn items_for_client(&self, client_id: &str) -> Result<Vec<TrainingItem>> {
        let cypher = format!(
            "MATCH (t:TrainingItem {{client_id: $client_id}})
             RETURN {ITEM_RETURN}
             ORDER BY t.created_at"
        );
        let mut cursor = self
            .graph
            .execute(query(&cypher).param("client_id", client_id))
            .await?;

        let mut items = Vec::new();
        while let Some(row) = cursor.next().await? {
            items.push(item_from_row(&row)?);
        }
        Ok(items)
    }

    async fn update_item_content(
        &self,
        client_id: &str,
        item_id: &str,
        content: &str,
        embedding: Option<&[f64]>,
    ) -> Result<()> {
        let processed_at = Utc::now().to_rfc3339();
        // El embedding puede faltar (fallo recuperado del modelo); en ese
        // caso se elimina la propiedad para que el índice no vea vectores
        // obsoletos del contenido anterior.
        let q = match embedding {
            Some(vector) => query(
                "MATCH (t:TrainingItem {id: $id, client_id: $client_id})
                 SET t.content = $content, t.embedding = $embedding,
                     t.processed_at = $processed_at
                 RETURN t.id AS id",
            )
            .param("embedding", vector.to_vec()),
            None => query(
                "MATCH (t:TrainingItem {id: $id, client_id: $client_id})
                 SET t.content = $content, t.processed_at = $processed_at
                 REMOVE t.embedding
                 RETURN t.id AS id",
            ),
        };

        let mut cursor = self
            .graph
            .execute(
                q.param("id", item_id)
                    .param("client_id", client_id)
                    .param("content", content)
                    .param("processed_at", processed_at),
            )
            .await?;

        if cursor.next().await?.is_none() {
            return Err(anyhow!(
                "Item {item_id} no encontrado para el cliente {client_id}"
            ));
        }
        Ok(())
    }

    async fn insert_item(&self, item: &TrainingItem) -> Result<()> {
        self.graph
            .run(
                query(
                    "MERGE (t:TrainingItem {id: $id})
                     SET t.client_id = $client_id, t.type = $type, t.name = $name,
                         t.url = $url, t.file_url = $file_url, t.content = $content,
                         t.derived_from = $derived_from, t.processed_at = $processed_at,
                         t.created_at = $created_at
                     WITH t
                     MATCH (c:Client {id: $client_id})
                     MERGE (c)-[:HAS_TRAINING]->(t)",
                )
                .param("id", item.id.clone())
                .param("client_id", item.client_id.clone())
                .param("type", item.source_type.as_str())
                .param("name", item.name.clone())
                .param("url", item.url.clone().unwrap_or_default())
                .param("file_url", item.file_url.clone().unwrap_or_default())
                .param("content", item.content.clone())
                .param("derived_from", item.derived_from.clone().unwrap_or_default())
                .param("processed_at", item.processed_at.clone().unwrap_or_default())
                .param("created_at", item.created_at.clone()),
            )
            .await?;

        if let Some(vector) = &item.embedding {
            self.graph
                .run(
                    query("MATCH (t:TrainingItem {id: $id}) SET t.embedding = $embedding")
                        .param("id", item.id.clone())
                        .param("embedding", vector.clone()),
                )
                .await?;
        }

        if let Some(parent_id) = &item.derived_from {
            self.graph
                .run(
                    query(
                        "MATCH (t:TrainingItem {id: $id}), (p:TrainingItem {id: $parent_id})
                         MERGE (t)-[:DERIVED_FROM]->(p)",
                    )
                    .param("id", item.id.clone())
                    .param("parent_id", parent_id.clone()),
                )
                .await?;
        }

        Ok(())
    }

    async fn delete_derived_of(&self, client_id: &str, parent_id: &str) -> Result<usize> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (t:TrainingItem {client_id: $client_id, derived_from: $parent_id})
                     DETACH DELETE t
                     RETURN count(t) AS removed",
                )
                .param("client_id", client_id)
                .param("parent_id", parent_id),
            )
            .await?;

        let removed: i64 = cursor
            .next()
            .await?
            .and_then(|row| row.get("removed"))
            .unwrap_or(0);
        Ok(removed as usize)
    }

    async fn search(
        &self,
        client_id: &str,
        query_embedding: &[f64],
        k: usize,
    ) -> Result<Vec<TrainingItem>> {
        let scan_k = (k * SCAN_FACTOR) as i64;
        let cypher = format!(
            "CALL db.index.vector.queryNodes($index_name, $scan_k, $embedding)
             YIELD node AS t, score
             WHERE t.client_id = $client_id
             RETURN {ITEM_RETURN}, score
             ORDER BY score DESC
             LIMIT $k"
        );

        let mut cursor = self
            .graph
            .execute(
                query(&cypher)
                    .param("index_name", VECTOR_INDEX_NAME)
                    .param("scan_k", scan_k)
                    .param("embedding", query_embedding.to_vec())
                    .param("client_id", client_id)
                    .param("k", k as i64),
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = cursor.next().await? {
            items.push(item_from_row(&row)?);
        }
        Ok(items)
    }
}
