//! In-memory drug interaction store
//!
//! An undirected graph keyed by normalized drug name. Edges carry the
//! interaction description. Built once at startup from ingested triples and
//! immutable afterwards, so concurrent readers need no locking.

use std::collections::HashMap;

/// A single (drug, drug, description) ingestion triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRecord {
    pub drug_a: String,
    pub drug_b: String,
    pub description: String,
}

impl InteractionRecord {
    pub fn new(
        drug_a: impl Into<String>,
        drug_b: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            drug_a: drug_a.into(),
            drug_b: drug_b.into(),
            description: description.into(),
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub drug_count: usize,
    pub interaction_count: usize,
}

/// Normalize a drug name for case-insensitive lookups.
///
/// Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Canonical unordered key for a drug pair
fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// In-memory drug interaction graph
pub struct InteractionStore {
    /// Normalized name -> display name (as first ingested, trimmed)
    display_names: HashMap<String, String>,

    /// Normalized names in first-ingested order
    order: Vec<String>,

    /// Adjacency list: normalized name -> normalized neighbor names
    adjacency: HashMap<String, Vec<String>>,

    /// Unordered pair -> interaction description (last ingest wins)
    edges: HashMap<(String, String), String>,
}

impl InteractionStore {
    fn new() -> Self {
        Self {
            display_names: HashMap::new(),
            order: Vec::new(),
            adjacency: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    /// Build the store from ingestion records.
    ///
    /// Rows with an empty drug name or empty description are skipped and
    /// counted; construction itself never fails.
    pub fn from_records(records: impl IntoIterator<Item = InteractionRecord>) -> (Self, usize) {
        let mut store = Self::new();
        let mut skipped = 0usize;

        for record in records {
            let a = normalize(&record.drug_a);
            let b = normalize(&record.drug_b);
            let description = record.description.trim();

            if a.is_empty() || b.is_empty() || description.is_empty() {
                skipped += 1;
                continue;
            }

            store.intern(&a, &record.drug_a);
            store.intern(&b, &record.drug_b);

            // Duplicate unordered pairs overwrite: last ingested row wins
            let existing = store.edges.insert(pair_key(&a, &b), description.to_string());
            if existing.is_none() {
                store.adjacency.entry(a.clone()).or_default().push(b.clone());
                if a != b {
                    store.adjacency.entry(b).or_default().push(a);
                }
            }
        }

        if skipped > 0 {
            tracing::warn!(skipped, "Skipped malformed interaction rows");
        }

        (store, skipped)
    }

    fn intern(&mut self, normalized: &str, raw: &str) {
        if !self.display_names.contains_key(normalized) {
            self.display_names
                .insert(normalized.to_string(), raw.trim().to_string());
            self.order.push(normalized.to_string());
        }
    }

    /// Look up the interaction between two drugs.
    ///
    /// Case-insensitive and order-independent; O(1) average.
    pub fn lookup_pair(&self, a: &str, b: &str) -> Option<&str> {
        let key = pair_key(&normalize(a), &normalize(b));
        self.edges.get(&key).map(String::as_str)
    }

    /// All interactions for a drug as (neighbor display name, description).
    ///
    /// Empty when the drug is absent, not an error.
    pub fn lookup_all(&self, drug: &str) -> Vec<(String, String)> {
        let normalized = normalize(drug);
        let Some(neighbors) = self.adjacency.get(&normalized) else {
            return Vec::new();
        };

        neighbors
            .iter()
            .filter_map(|neighbor| {
                let description = self.edges.get(&pair_key(&normalized, neighbor))?;
                let display = self
                    .display_names
                    .get(neighbor)
                    .cloned()
                    .unwrap_or_else(|| neighbor.clone());
                Some((display, description.clone()))
            })
            .collect()
    }

    /// Whether a normalized drug name exists in the store
    pub fn contains(&self, drug: &str) -> bool {
        self.display_names.contains_key(&normalize(drug))
    }

    /// Display name for a canonical drug name
    pub fn display_name(&self, canonical: &str) -> Option<&str> {
        self.display_names.get(canonical).map(String::as_str)
    }

    /// Canonical drug names in first-ingested order
    pub fn drug_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Node and edge counts
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            drug_count: self.display_names.len(),
            interaction_count: self.edges.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> InteractionStore {
        let (store, skipped) = InteractionStore::from_records(vec![
            InteractionRecord::new("Warfarin", "Aspirin", "Increases bleeding risk"),
            InteractionRecord::new("Warfarin", "Ibuprofen", "Moderate interaction"),
        ]);
        assert_eq!(skipped, 0);
        store
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = normalize("  WarFarin  ");
        assert_eq!(once, "warfarin");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_lookup_pair_symmetric() {
        let store = fixture();
        assert_eq!(
            store.lookup_pair("aspirin", "WARFARIN"),
            Some("Increases bleeding risk")
        );
        assert_eq!(
            store.lookup_pair("WARFARIN", "aspirin"),
            store.lookup_pair("aspirin", "WARFARIN")
        );
    }

    #[test]
    fn test_lookup_pair_missing_edge_is_none_not_error() {
        let store = fixture();
        assert_eq!(store.lookup_pair("aspirin", "ibuprofen"), None);
        assert_eq!(store.lookup_pair("aspirin", "unknown-drug"), None);
    }

    #[test]
    fn test_lookup_all_returns_both_edges() {
        let store = fixture();
        let all = store.lookup_all("warfarin");
        assert_eq!(all.len(), 2);
        let neighbors: Vec<&str> = all.iter().map(|(name, _)| name.as_str()).collect();
        assert!(neighbors.contains(&"Aspirin"));
        assert!(neighbors.contains(&"Ibuprofen"));
    }

    #[test]
    fn test_lookup_all_absent_drug_is_empty() {
        let store = fixture();
        assert!(store.lookup_all("metformin").is_empty());
    }

    #[test]
    fn test_duplicate_pair_last_write_wins() {
        let (store, _) = InteractionStore::from_records(vec![
            InteractionRecord::new("Warfarin", "Aspirin", "First description"),
            InteractionRecord::new("aspirin", "warfarin", "Second description"),
        ]);
        assert_eq!(
            store.lookup_pair("warfarin", "aspirin"),
            Some("Second description")
        );
        assert_eq!(store.stats().interaction_count, 1);
        // Adjacency is not duplicated by the overwrite
        assert_eq!(store.lookup_all("warfarin").len(), 1);
    }

    #[test]
    fn test_malformed_rows_skipped_with_count() {
        let (store, skipped) = InteractionStore::from_records(vec![
            InteractionRecord::new("Warfarin", "Aspirin", "Increases bleeding risk"),
            InteractionRecord::new("", "Aspirin", "missing first drug"),
            InteractionRecord::new("Warfarin", "   ", "missing second drug"),
            InteractionRecord::new("Warfarin", "Metformin", ""),
        ]);
        assert_eq!(skipped, 3);
        assert_eq!(store.stats().interaction_count, 1);
        assert_eq!(store.stats().drug_count, 2);
    }

    #[test]
    fn test_stats_counts() {
        let store = fixture();
        let stats = store.stats();
        assert_eq!(stats.drug_count, 3);
        assert_eq!(stats.interaction_count, 2);
    }

    #[test]
    fn test_ingestion_order_preserved() {
        let store = fixture();
        let names: Vec<&str> = store.drug_names().collect();
        assert_eq!(names, vec!["warfarin", "aspirin", "ibuprofen"]);
    }

    #[test]
    fn test_display_name_keeps_first_ingested_form() {
        let (store, _) = InteractionStore::from_records(vec![
            InteractionRecord::new("Warfarin", "ASPIRIN", "first"),
            InteractionRecord::new("WARFARIN", "aspirin", "second"),
        ]);
        assert_eq!(store.display_name("warfarin"), Some("Warfarin"));
        assert_eq!(store.display_name("aspirin"), Some("ASPIRIN"));
    }
}
