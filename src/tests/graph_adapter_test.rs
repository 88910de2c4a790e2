use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{MapOptions, ResourceCapability};
use crate::services::adapters::{
    GraphAdapter, GraphClient, GraphNode, GraphNodeType, GraphRelationship, GraphSchema,
    ResourceAdapter,
};
use crate::utils::Result;

/// In-memory graph: Compound nodes carrying chebi/hmdb ids, with a
/// `produces` relationship to Gene nodes carrying symbols
pub struct FakeGraph {
    nodes: Vec<GraphNode>,
    edges: HashMap<(String, String), String>,
}

impl FakeGraph {
    pub fn sample() -> Self {
        let mut compound_properties = HashMap::new();
        compound_properties.insert("chebi".to_string(), "CHEBI:17234".to_string());
        compound_properties.insert("hmdb".to_string(), "HMDB0000122".to_string());

        let nodes = vec![GraphNode {
            id: "node-1".to_string(),
            node_type: "Compound".to_string(),
            properties: compound_properties,
        }];

        let mut edges = HashMap::new();
        edges.insert(("node-1".to_string(), "produces".to_string()), "HK1".to_string());

        Self { nodes, edges }
    }
}

#[async_trait]
impl GraphClient for FakeGraph {
    async fn schema(&self) -> Result<GraphSchema> {
        Ok(GraphSchema {
            node_types: vec![
                GraphNodeType {
                    name: "Compound".to_string(),
                    ontology_fields: vec!["chebi".to_string(), "hmdb".to_string()],
                    relationships: vec![GraphRelationship {
                        name: "produces".to_string(),
                        target_node_type: "Gene".to_string(),
                    }],
                },
                GraphNodeType {
                    name: "Gene".to_string(),
                    ontology_fields: vec!["gene_symbol".to_string()],
                    relationships: vec![],
                },
            ],
        })
    }

    async fn find_node(&self, ontology_type: &str, entity_id: &str) -> Result<Option<GraphNode>> {
        Ok(self
            .nodes
            .iter()
            .find(|node| node.properties.get(ontology_type).map(String::as_str) == Some(entity_id))
            .cloned())
    }

    async fn traverse(
        &self,
        node: &GraphNode,
        relationship: &str,
        _target_ontology: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .edges
            .get(&(node.id.clone(), relationship.to_string()))
            .cloned())
    }
}

#[tokio::test]
async fn test_schema_analysis_discovers_capabilities() {
    let adapter = GraphAdapter::discover("graph", Arc::new(FakeGraph::sample()))
        .await
        .expect("Discovery failed");

    // Same-node field pairs, both directions
    assert!(adapter.has_capability(&ResourceCapability::name_for("chebi", "hmdb")));
    assert!(adapter.has_capability(&ResourceCapability::name_for("hmdb", "chebi")));
    // Relationship-derived capability toward the gene node
    assert!(adapter.has_capability(&ResourceCapability::name_for("chebi", "gene_symbol")));
    // Nothing points back from genes to compounds
    assert!(!adapter.has_capability(&ResourceCapability::name_for("gene_symbol", "chebi")));
}

#[tokio::test]
async fn test_direct_property_read() {
    let adapter = GraphAdapter::discover("graph", Arc::new(FakeGraph::sample()))
        .await
        .unwrap();

    let result = adapter
        .map_entity("CHEBI:17234", "chebi", "hmdb", &MapOptions::default())
        .await
        .expect("Mapping failed")
        .expect("Expected a mapping");

    assert_eq!(result.target_id.as_deref(), Some("HMDB0000122"));
    assert_eq!(result.mapping_source, "graph_direct");
    assert!((result.confidence - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_relationship_traversal() {
    let adapter = GraphAdapter::discover("graph", Arc::new(FakeGraph::sample()))
        .await
        .unwrap();

    let result = adapter
        .map_entity("CHEBI:17234", "chebi", "gene_symbol", &MapOptions::default())
        .await
        .expect("Mapping failed")
        .expect("Expected a mapping");

    assert_eq!(result.target_id.as_deref(), Some("HK1"));
    assert_eq!(result.mapping_source, "graph_traversal");
    assert!((result.confidence - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_unknown_capability_returns_none() {
    let adapter = GraphAdapter::discover("graph", Arc::new(FakeGraph::sample()))
        .await
        .unwrap();

    let result = adapter
        .map_entity("CHEBI:17234", "chebi", "uniprot", &MapOptions::default())
        .await
        .expect("Mapping failed");
    assert!(result.is_none());
}

#[tokio::test]
async fn test_missing_node_returns_none() {
    let adapter = GraphAdapter::discover("graph", Arc::new(FakeGraph::sample()))
        .await
        .unwrap();

    let result = adapter
        .map_entity("CHEBI:99999", "chebi", "hmdb", &MapOptions::default())
        .await
        .expect("Mapping failed");
    assert!(result.is_none());
}
