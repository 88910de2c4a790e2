//! Knowledge-graph resource adapter
//!
//! Generic over a `GraphClient` so any property-graph backend can plug in.
//! Mapping capabilities are discovered once at construction by analyzing the
//! graph schema: every pair of ontology fields reachable on one node yields a
//! direct-read capability, and every relationship between node types yields a
//! traversal capability.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::ResourceAdapter;
use crate::models::{MapOptions, MappingResult, ResourceCapability};
use crate::utils::Result;

/// A node returned by the graph backend
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub node_type: String,
    pub properties: HashMap<String, String>,
}

/// Relationship leaving a node type
#[derive(Debug, Clone)]
pub struct GraphRelationship {
    pub name: String,
    pub target_node_type: String,
}

/// One node type with the ontology identifier fields it carries
#[derive(Debug, Clone)]
pub struct GraphNodeType {
    pub name: String,
    pub ontology_fields: Vec<String>,
    pub relationships: Vec<GraphRelationship>,
}

/// Schema snapshot used for capability discovery
#[derive(Debug, Clone, Default)]
pub struct GraphSchema {
    pub node_types: Vec<GraphNodeType>,
}

/// Minimal interface a graph backend must provide
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Describe node types, their ontology fields and relationships
    async fn schema(&self) -> Result<GraphSchema>;

    /// Resolve a node by one of its ontology identifiers
    async fn find_node(&self, ontology_type: &str, entity_id: &str) -> Result<Option<GraphNode>>;

    /// Follow a named relationship and read the target ontology field on the
    /// far node
    async fn traverse(
        &self,
        node: &GraphNode,
        relationship: &str,
        target_ontology: &str,
    ) -> Result<Option<String>>;
}

const DIRECT_CONFIDENCE: f64 = 1.0;
const TRAVERSAL_CONFIDENCE: f64 = 0.9;

/// Infer an ontology type from a graph field name
///
/// Small discovery heuristic for schema analysis: recognizes the common
/// identifier namespaces by substring and otherwise falls back to the field
/// name itself.
pub fn infer_ontology_type(field_name: &str) -> String {
    let name = field_name
        .rsplit('.')
        .next()
        .unwrap_or(field_name)
        .to_lowercase();

    if name.contains("chebi") {
        "chebi".to_string()
    } else if name.contains("hmdb") {
        "hmdb".to_string()
    } else if name.contains("pubchem") {
        "pubchem".to_string()
    } else if name.contains("inchi") && name.contains("key") {
        "inchikey".to_string()
    } else if name.contains("inchi") {
        "inchi".to_string()
    } else if name.contains("smiles") {
        "smiles".to_string()
    } else if name.contains("kegg") {
        "kegg".to_string()
    } else if name.contains("uniprot") {
        "uniprot".to_string()
    } else if name.contains("ensembl") {
        "ensembl".to_string()
    } else if name.contains("symbol") && (name.contains("gene") || name.contains("protein")) {
        "gene_symbol".to_string()
    } else if name.contains("mondo") {
        "mondo".to_string()
    } else if name.contains("doid") {
        "doid".to_string()
    } else if name.contains("mesh") {
        "mesh".to_string()
    } else {
        name
    }
}

/// Adapter exposing a knowledge graph through the resource contract
pub struct GraphAdapter {
    resource_name: String,
    client: Arc<dyn GraphClient>,
    capabilities: HashMap<String, ResourceCapability>,
}

impl GraphAdapter {
    /// Build the adapter, running the one-time schema analysis pass
    pub async fn discover(
        resource_name: impl Into<String>,
        client: Arc<dyn GraphClient>,
    ) -> Result<Self> {
        let resource_name = resource_name.into();
        let schema = client.schema().await?;
        let capabilities = analyze_schema(&schema);

        tracing::info!(
            "Graph resource '{}' exposes {} mapping capabilities",
            resource_name,
            capabilities.len()
        );

        Ok(Self { resource_name, client, capabilities })
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &ResourceCapability> {
        self.capabilities.values()
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }
}

/// Derive `<source>_to_<target>` capabilities from a schema snapshot
fn analyze_schema(schema: &GraphSchema) -> HashMap<String, ResourceCapability> {
    let mut capabilities = HashMap::new();

    let fields_by_type: HashMap<&str, &Vec<String>> = schema
        .node_types
        .iter()
        .map(|node_type| (node_type.name.as_str(), &node_type.ontology_fields))
        .collect();

    for node_type in &schema.node_types {
        // Two identifier fields on one node map directly to each other
        for source_field in &node_type.ontology_fields {
            for target_field in &node_type.ontology_fields {
                if source_field == target_field {
                    continue;
                }
                let name = ResourceCapability::name_for(source_field, target_field);
                capabilities.entry(name.clone()).or_insert_with(|| {
                    let mut capability = ResourceCapability::new(
                        name,
                        format!("{} property on {} nodes", target_field, node_type.name),
                    );
                    capability.confidence = DIRECT_CONFIDENCE;
                    capability
                });
            }
        }

        // A relationship connects every field pair across the two node types
        for relationship in &node_type.relationships {
            let Some(target_fields) = fields_by_type.get(relationship.target_node_type.as_str())
            else {
                continue;
            };
            for source_field in &node_type.ontology_fields {
                for target_field in *target_fields {
                    if source_field == target_field {
                        continue;
                    }
                    let name = ResourceCapability::name_for(source_field, target_field);
                    capabilities.entry(name.clone()).or_insert_with(|| {
                        let mut capability = ResourceCapability::new(
                            name,
                            format!(
                                "{} via {} -> {}",
                                target_field, relationship.name, relationship.target_node_type
                            ),
                        );
                        capability.confidence = TRAVERSAL_CONFIDENCE;
                        capability
                            .parameters
                            .insert("relationship".to_string(), relationship.name.clone());
                        capability
                    });
                }
            }
        }
    }

    capabilities
}

#[async_trait]
impl ResourceAdapter for GraphAdapter {
    fn name(&self) -> &str {
        &self.resource_name
    }

    async fn map_entity(
        &self,
        source_id: &str,
        source_type: &str,
        target_type: &str,
        _opts: &MapOptions,
    ) -> Result<Option<MappingResult>> {
        let capability_name = ResourceCapability::name_for(source_type, target_type);
        let Some(capability) = self.capabilities.get(&capability_name) else {
            return Ok(None);
        };

        let Some(node) = self.client.find_node(source_type, source_id).await? else {
            tracing::debug!("No graph node found for {}:{}", source_type, source_id);
            return Ok(None);
        };

        // Prefer the direct property read; fall back to the capability's
        // traversal when the node does not carry the target field
        let (target_id, mapping_source) = if let Some(value) = node.properties.get(target_type) {
            (Some(value.clone()), "graph_direct")
        } else if let Some(relationship) = capability.parameters.get("relationship") {
            let traversed = self
                .client
                .traverse(&node, relationship, target_type)
                .await?;
            (traversed, "graph_traversal")
        } else {
            (None, "graph_direct")
        };

        let Some(target_id) = target_id else {
            return Ok(None);
        };

        let mut result = MappingResult {
            source_id: source_id.to_string(),
            target_id: Some(target_id),
            target_type: target_type.to_string(),
            confidence: capability.confidence,
            mapping_source: mapping_source.to_string(),
            metadata: HashMap::new(),
        };
        result.insert_metadata("capability", capability_name);
        result.insert_metadata("node_type", node.node_type.clone());

        Ok(Some(result))
    }
}
