//! Test fixtures for engine integration tests.

use keystone_compiler::{Edge, Node, ResourceGraph};
use serde_json::Value;

/// Builder for creating test resource graphs.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an EC2 instance with both required properties.
    pub fn instance(self, id: &str) -> Self {
        self.node(
            Node::new(id, "aws_instance")
                .with_property("ami", "ami-0c55b159cbfafe1f0")
                .with_property("instance_type", "t3.micro"),
        )
    }

    /// Adds an S3 bucket.
    pub fn bucket(self, id: &str, bucket_name: &str) -> Self {
        self.node(Node::new(id, "aws_s3_bucket").with_property("bucket_name", bucket_name))
    }

    /// Adds a node of any type with the given properties.
    pub fn raw(self, id: &str, resource_type: &str, properties: &[(&str, Value)]) -> Self {
        let node = properties
            .iter()
            .fold(Node::new(id, resource_type), |node, (key, value)| {
                node.with_property(*key, value.clone())
            });
        self.node(node)
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds an edge; the compiler never reads these.
    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.edges.push(Edge {
            id: format!("{from}-{to}"),
            from: from.to_owned(),
            to: to.to_owned(),
            kind: "depends_on".to_owned(),
        });
        self
    }

    pub fn build(self) -> ResourceGraph {
        ResourceGraph::new(self.nodes, self.edges)
    }
}
