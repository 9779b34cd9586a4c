//! Tool surface exposed to the chat model
//!
//! A closed set of operations modeled as a tagged union: the loop parses a
//! model-issued call into a `ToolInvocation` and matches on the tag, never
//! dispatching through reflection. Inputs are plain strings, outputs are
//! deterministic flat text. Every drug mention is resolved before hitting
//! the store, remappings are reported explicitly, and an empty lookup is
//! always phrased as a positive statement rather than empty output.

use crate::resolver::NameResolver;
use crate::store::{normalize, InteractionStore};
use pharmgraph_common::chat::ToolSchema;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub const SEARCH_INTERACTIONS: &str = "search_interactions";
pub const LIST_INTERACTIONS: &str = "list_interactions";
pub const DATABASE_STATS: &str = "database_stats";
pub const MAP_DRUG_NAME: &str = "map_drug_name";

/// Shared read-only dependencies for tool execution
pub struct ToolContext {
    pub store: Arc<InteractionStore>,
    pub resolver: Arc<NameResolver>,
}

/// One parsed tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    /// Pairwise interaction search over two or more mentioned drugs
    SearchInteractions { query: String },
    /// All known interactions for a single drug
    ListInteractions { drug: String },
    /// Node and edge counts
    DatabaseStats,
    /// Explicit mention-to-canonical mapping report
    MapDrugName { drug: String },
}

impl ToolInvocation {
    /// Parse a named call with JSON arguments into an invocation.
    ///
    /// Failures come back as plain text so the loop can feed them to the
    /// model as a tool result instead of aborting the turn.
    pub fn parse(name: &str, arguments: &str) -> Result<Self, String> {
        let args: Value = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(arguments)
                .map_err(|e| format!("Invalid arguments for tool '{}': {}", name, e))?
        };

        match name {
            SEARCH_INTERACTIONS => Ok(Self::SearchInteractions {
                query: required_str(&args, "query", name)?,
            }),
            LIST_INTERACTIONS => Ok(Self::ListInteractions {
                drug: required_str(&args, "drug", name)?,
            }),
            DATABASE_STATS => Ok(Self::DatabaseStats),
            MAP_DRUG_NAME => Ok(Self::MapDrugName {
                drug: required_str(&args, "drug", name)?,
            }),
            other => Err(format!("Unknown tool '{}'", other)),
        }
    }

    /// Tool name as offered to the model
    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchInteractions { .. } => SEARCH_INTERACTIONS,
            Self::ListInteractions { .. } => LIST_INTERACTIONS,
            Self::DatabaseStats => DATABASE_STATS,
            Self::MapDrugName { .. } => MAP_DRUG_NAME,
        }
    }

    /// Schemas for all operations, in the chat-completions wire format
    pub fn schemas() -> Vec<ToolSchema> {
        vec![
            ToolSchema::function(
                SEARCH_INTERACTIONS,
                "Search for interactions between two or more specific drugs. \
                 Input is the drug names separated by 'and', 'with', or commas, \
                 e.g. 'Warfarin and Aspirin' or 'tylenol, advil, aspirin'. \
                 Names are automatically mapped to their standardized forms.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Two or more drug names separated by 'and', 'with', or commas"
                        }
                    },
                    "required": ["query"]
                }),
            ),
            ToolSchema::function(
                LIST_INTERACTIONS,
                "Get ALL known interactions for a SINGLE drug. Input is one \
                 drug name; it is automatically mapped to its standardized form.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "drug": {
                            "type": "string",
                            "description": "One drug name"
                        }
                    },
                    "required": ["drug"]
                }),
            ),
            ToolSchema::function(
                DATABASE_STATS,
                "Get statistics about the interaction database: total drugs \
                 and total known interactions.",
                serde_json::json!({
                    "type": "object",
                    "properties": {}
                }),
            ),
            ToolSchema::function(
                MAP_DRUG_NAME,
                "Show how a drug name maps to its standardized form, with a \
                 similarity score and ranked alternatives. Useful when unsure \
                 how the system interprets a name.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "drug": {
                            "type": "string",
                            "description": "The drug name to map"
                        }
                    },
                    "required": ["drug"]
                }),
            ),
        ]
    }

    /// Execute against the store and resolver, producing flat text
    pub async fn execute(&self, ctx: &ToolContext) -> String {
        match self {
            Self::SearchInteractions { query } => search_interactions(ctx, query).await,
            Self::ListInteractions { drug } => list_interactions(ctx, drug).await,
            Self::DatabaseStats => database_stats(ctx),
            Self::MapDrugName { drug } => map_drug_name(ctx, drug).await,
        }
    }
}

fn required_str(args: &Value, field: &str, tool: &str) -> Result<String, String> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| format!("Tool '{}' requires a non-empty '{}' argument", tool, field))
}

/// Split a query like "Warfarin and Aspirin, ibuprofen" into deduplicated
/// mentions, preserving order.
fn split_mentions(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let unified = lowered
        .replace(" and ", ",")
        .replace(" with ", ",")
        .replace(" & ", ",")
        .replace(';', ",");

    let mut seen = HashSet::new();
    unified
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter(|part| seen.insert(part.to_string()))
        .map(String::from)
        .collect()
}

/// Display form for user-facing text: stored display name when known,
/// title-cased otherwise.
fn display(ctx: &ToolContext, canonical: &str) -> String {
    match ctx.store.display_name(canonical) {
        Some(name) => title_case(name),
        None => title_case(canonical),
    }
}

fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

struct ResolvedMention {
    mention: String,
    canonical: String,
    matched: bool,
}

async fn resolve_mentions(ctx: &ToolContext, mentions: &[String]) -> Vec<ResolvedMention> {
    let mut resolved = Vec::with_capacity(mentions.len());
    for mention in mentions {
        let result = ctx.resolver.resolve(mention).await;
        match result.resolved {
            Some(canonical) => resolved.push(ResolvedMention {
                mention: mention.clone(),
                canonical,
                matched: true,
            }),
            None => resolved.push(ResolvedMention {
                mention: mention.clone(),
                canonical: normalize(mention),
                matched: false,
            }),
        }
    }
    resolved
}

/// Remapping and not-found notes shared by the lookup tools
fn mapping_notes(resolved: &[ResolvedMention]) -> Vec<String> {
    let mut notes = Vec::new();
    for entry in resolved {
        if entry.matched && entry.canonical != normalize(&entry.mention) {
            notes.push(format!(
                "'{}' interpreted as '{}'.",
                entry.mention, entry.canonical
            ));
        } else if !entry.matched {
            notes.push(format!(
                "'{}' was not found in the database; using the name as given.",
                entry.mention
            ));
        }
    }
    notes
}

async fn search_interactions(ctx: &ToolContext, query: &str) -> String {
    let mentions = split_mentions(query);
    if mentions.len() < 2 {
        return "Please provide at least two drug names separated by 'and', 'with', \
                or a comma. Example: 'Warfarin and Aspirin'."
            .to_string();
    }

    let resolved = resolve_mentions(ctx, &mentions).await;
    let mut lines = mapping_notes(&resolved);

    // Unique canonical names, preserving order; two mentions can resolve to
    // the same drug
    let mut seen = HashSet::new();
    let names: Vec<&str> = resolved
        .iter()
        .filter(|r| seen.insert(r.canonical.clone()))
        .map(|r| r.canonical.as_str())
        .collect();

    if names.len() < 2 {
        lines.push(format!(
            "All mentions refer to the same drug '{}'; there is nothing to compare.",
            names.first().copied().unwrap_or_default()
        ));
        return lines.join("\n");
    }

    // Exactly the unique unordered pairs, each looked up once
    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            let (a, b) = (names[i], names[j]);
            match ctx.store.lookup_pair(a, b) {
                Some(description) => lines.push(format!(
                    "Interaction between {} and {}: {}",
                    display(ctx, a),
                    display(ctx, b),
                    description
                )),
                None => lines.push(format!(
                    "No known interaction between {} and {} in the database.",
                    display(ctx, a),
                    display(ctx, b)
                )),
            }
        }
    }

    lines.join("\n")
}

async fn list_interactions(ctx: &ToolContext, drug: &str) -> String {
    let resolved = resolve_mentions(ctx, std::slice::from_ref(&drug.to_string())).await;
    let mut lines = mapping_notes(&resolved);
    let entry = &resolved[0];
    let shown = display(ctx, &entry.canonical);

    let interactions = ctx.store.lookup_all(&entry.canonical);
    if interactions.is_empty() {
        lines.push(format!(
            "No interactions found for {} in the database. The drug may not be \
             in our system or has no recorded interactions.",
            shown
        ));
    } else {
        lines.push(format!(
            "Found {} interaction(s) for {}:",
            interactions.len(),
            shown
        ));
        for (i, (neighbor, description)) in interactions.iter().enumerate() {
            lines.push(format!("{}. {}: {}", i + 1, title_case(neighbor), description));
        }
    }

    lines.join("\n")
}

fn database_stats(ctx: &ToolContext) -> String {
    let stats = ctx.store.stats();
    format!(
        "Database statistics:\n- Known drugs: {}\n- Known interactions: {}",
        stats.drug_count, stats.interaction_count
    )
}

async fn map_drug_name(ctx: &ToolContext, drug: &str) -> String {
    let result = ctx.resolver.resolve(drug).await;

    match &result.resolved {
        Some(canonical) => {
            let mut text = format!(
                "Mapped '{}' to '{}' (score: {:.3}, confidence: {}).",
                drug,
                canonical,
                result.score,
                result.confidence_label()
            );
            if !result.alternatives.is_empty() {
                let alternatives: Vec<String> = result
                    .alternatives
                    .iter()
                    .map(|s| format!("{} ({:.3})", s.name, s.score))
                    .collect();
                text.push_str(&format!("\nAlternatives: {}", alternatives.join(", ")));
            }
            text
        }
        None => {
            if result.alternatives.is_empty() {
                format!("No confident match found for '{}'.", drug)
            } else {
                let candidates: Vec<String> = result
                    .alternatives
                    .iter()
                    .map(|s| format!("{} ({:.3})", s.name, s.score))
                    .collect();
                format!(
                    "No confident match found for '{}'. Closest candidates: {}",
                    drug,
                    candidates.join(", ")
                )
            }
        }
    }
}
