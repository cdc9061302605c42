//! Contrato del almacén de conocimiento (patrón repositorio).
//!
//! La canalización nunca habla con la base de datos directamente: recibe un
//! `Arc<dyn KnowledgeStore>` construido una sola vez en el arranque. La
//! implementación de producción es `Neo4jStore`; `MemoryStore` sirve como
//! doble de pruebas y para demos sin base de datos.
//!
//! Invariante duro de aislamiento de tenants: toda lectura y escritura de
//! items está filtrada por `client_id`.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{Client, TrainingItem};

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Round-trip trivial contra el backend, para el health check.
    async fn ping(&self) -> Result<()>;

    /// Busca un cliente por id. `None` significa cliente inexistente, que el
    /// llamante debe tratar como error de configuración (404), no transitorio.
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>>;

    /// Todos los items del cliente, sin ordenar. Es también el conjunto de
    /// respaldo cuando la búsqueda vectorial no está disponible.
    async fn items_for_client(&self, client_id: &str) -> Result<Vec<TrainingItem>>;

    /// Reemplaza en bloque el contenido (y embedding) de un item y lo marca
    /// como procesado. La escritura es única y atómica por item.
    async fn update_item_content(
        &self,
        client_id: &str,
        item_id: &str,
        content: &str,
        embedding: Option<&[f64]>,
    ) -> Result<()>;

    /// Inserta un item derivado (faceta extraída de otro item).
    async fn insert_item(&self, item: &TrainingItem) -> Result<()>;

    /// Elimina los items derivados de un padre, para recrearlos al reprocesar.
    /// Devuelve cuántos se eliminaron.
    async fn delete_derived_of(&self, client_id: &str, parent_id: &str) -> Result<usize>;

    /// Búsqueda por similitud restringida al cliente: como máximo `k` items,
    /// los vectores más cercanos primero.
    async fn search(
        &self,
        client_id: &str,
        query_embedding: &[f64],
        k: usize,
    ) -> Result<Vec<TrainingItem>>;
}

// ---------------------------------------------------------------------
// Backend en memoria
// ---------------------------------------------------------------------

/// Almacén en memoria con búsqueda por similitud coseno. Usado como doble en
/// los tests de la canalización; no persiste nada entre ejecuciones.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    clients: HashMap<String, Client>,
    items: Vec<TrainingItem>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_client(&self, client: Client) {
        self.inner.lock().unwrap().clients.insert(client.id.clone(), client);
    }

    pub fn add_item(&self, item: TrainingItem) {
        self.inner.lock().unwrap().items.push(item);
    }

    /// Item por id, útil en aserciones de tests.
    pub fn item(&self, item_id: &str) -> Option<TrainingItem> {
        self.inner
            .lock()
            .unwrap()
            .items
            .iter()
            .find(|i| i.id == item_id)
            .cloned()
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        Ok(self.inner.lock().unwrap().clients.get(client_id).cloned())
    }

    async fn items_for_client(&self, client_id: &str) -> Result<Vec<TrainingItem>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .items
            .iter()
            .filter(|i| i.client_id == client_id)
            .cloned()
            .collect())
    }

    async fn update_item_content(
        &self,
        client_id: &str,
        item_id: &str,
        content: &str,
        embedding: Option<&[f64]>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner
            .items
            .iter_mut()
            .find(|i| i.id == item_id && i.client_id == client_id)
            .ok_or_else(|| anyhow!("Item {item_id} no encontrado para el cliente {client_id}"))?;
        item.content = content.to_string();
        item.embedding = embedding.map(|e| e.to_vec());
        item.processed_at = Some(Utc::now().to_rfc3339());
        Ok(())
    }

    async fn insert_item(&self, item: &TrainingItem) -> Result<()> {
        self.inner.lock().unwrap().items.push(item.clone());
        Ok(())
    }

    async fn delete_derived_of(&self, client_id: &str, parent_id: &str) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.items.len();
        inner.items.retain(|i| {
            !(i.client_id == client_id && i.derived_from.as_deref() == Some(parent_id))
        });
        Ok(before - inner.items.len())
    }

    async fn search(
        &self,
        client_id: &str,
        query_embedding: &[f64],
        k: usize,
    ) -> Result<Vec<TrainingItem>> {
        let inner = self.inner.lock().unwrap();
        let mut scored: Vec<(f64, &TrainingItem)> = inner
            .items
            .iter()
            .filter(|i| i.client_id == client_id)
            .filter_map(|i| {
                i.embedding
                    .as_ref()
                    .map(|e| (cosine_similarity(query_embedding, e), i))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(k).map(|(_, i)| i.clone()).collect())
    }
}
