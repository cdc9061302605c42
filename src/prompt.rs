//! Composición del prompt de sistema a partir de la identidad del cliente y
//! los items recuperados.
//!
//! Las reglas de formato de respuesta son literales y deliberadamente
//! estrictas: para teléfono y dirección el modelo debe extraer el valor
//! exacto o devolver el centinela fijo, sin prosa alrededor.

use crate::models::TrainingItem;

pub const NO_PHONE_SENTINEL: &str = "No phone number available";
pub const NO_ADDRESS_SENTINEL: &str = "No address available";

/// Construye el prompt de sistema completo. Los candidatos se anexan en el
/// orden recibido (ranking de la búsqueda, o arbitrario si vienen del
/// conjunto completo); aquí no se re-ordena ni se trunca.
pub fn compose(client_name: &str, candidates: &[TrainingItem]) -> String {
    let mut prompt = format!(
        "You are a helpful assistant for {client_name}. You should respond in a \
         friendly, professional tone.\n\n\
         Follow these rules exactly:\n\
         1. If the user asks for a phone number, find it in the CONTACT INFORMATION \
         section below and reply with ONLY the number, exactly as written, with no \
         extra words. If no phone number appears below, reply exactly \
         \"{NO_PHONE_SENTINEL}\".\n\
         2. If the user asks for an address, reply with ONLY the address, exactly as \
         written. If no address appears below, reply exactly \"{NO_ADDRESS_SENTINEL}\".\n\
         3. Otherwise, answer concisely using only the information below. If the \
         answer is not contained in the information, say honestly that you don't \
         have that information; never make it up.\n\n\
         Here is the information for {client_name}:"
    );

    for candidate in candidates {
        let header = if candidate.name.is_empty() {
            format!("Item {}", candidate.id)
        } else {
            candidate.name.clone()
        };
        prompt.push_str(&format!("\n\n--- {header} ---\n{}", candidate.content));
    }

    prompt
}
