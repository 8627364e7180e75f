//! Worker identity generation.

/// Generate a fresh worker identity: a UUID v4 rendered as 32 lowercase
/// hex characters without hyphens.
///
/// Caller-supplied identities are used verbatim and never validated.
pub fn generate_worker_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_is_32_hex_chars() {
        let id = generate_worker_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(generate_worker_id(), generate_worker_id());
    }
}
