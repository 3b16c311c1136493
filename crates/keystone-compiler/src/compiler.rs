//! Graph to Terraform compilation.

use tracing::{debug, instrument};

use crate::error::{CompileError, CompileResult};
use crate::graph::{CloudConfig, Node, ResourceGraph};
use crate::hcl::{quote, Block};
use crate::resource::ResourceKind;

/// File name for resource definitions.
pub const MAIN_FILE: &str = "main.tf";
/// File name for input variables.
pub const VARIABLES_FILE: &str = "variables.tf";
/// File name for outputs.
pub const OUTPUTS_FILE: &str = "outputs.tf";
/// File name for the provider configuration.
pub const PROVIDER_FILE: &str = "provider.tf";

/// Value of the `ManagedBy` tag applied to every resource.
pub const MANAGED_BY: &str = "Keystone";

const AWS_PROVIDER_SOURCE: &str = "hashicorp/aws";
const AWS_PROVIDER_VERSION: &str = "~> 5.0";

/// Compiled Terraform source, one string per generated file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledCode {
    pub main: String,
    pub variables: String,
    pub outputs: String,
    pub provider: String,
}

impl CompiledCode {
    /// A bundle with four empty files, enough to run `destroy` against a
    /// seeded state file.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// File names paired with their contents.
    #[must_use]
    pub fn files(&self) -> [(&'static str, &str); 4] {
        [
            (MAIN_FILE, &self.main),
            (VARIABLES_FILE, &self.variables),
            (OUTPUTS_FILE, &self.outputs),
            (PROVIDER_FILE, &self.provider),
        ]
    }
}

/// Compiles a [`ResourceGraph`] into a [`CompiledCode`] bundle.
///
/// Nodes are compiled in input order. Edges are not consulted; cross-resource
/// ordering comes from the references Terraform finds in the generated code.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphCompiler;

impl GraphCompiler {
    /// Create a compiler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Compile a graph for the given cloud.
    ///
    /// Fails on the first node with an unknown type, a missing required
    /// property or an unrenderable property.
    #[instrument(skip_all, fields(nodes = graph.nodes.len(), provider = %cloud.provider))]
    pub fn compile(&self, graph: &ResourceGraph, cloud: &CloudConfig) -> CompileResult<CompiledCode> {
        let mut main = String::new();
        let mut outputs = String::new();

        for node in &graph.nodes {
            let kind = ResourceKind::from_type(&node.resource_type)
                .ok_or_else(|| CompileError::UnsupportedResourceType(node.resource_type.clone()))?;

            kind.validate(node)?;
            let fragment = kind.render(node)?;
            debug!(node_id = %node.id, kind = %kind, "compiled node");

            main.push_str(&fragment);
            main.push('\n');
            outputs.push_str(&generate_output(node, kind));
            outputs.push('\n');
        }

        Ok(CompiledCode {
            main,
            variables: generate_variables(),
            outputs,
            provider: generate_provider(cloud),
        })
    }
}

fn generate_output(node: &Node, kind: ResourceKind) -> String {
    Block::labelled("output", &format!("{}_id", node.id))
        .attr("value", format!("{}.{}.id", kind.type_name(), node.id))
        .string("description", &format!("ID of {}", node.id))
        .render()
}

fn generate_variables() -> String {
    Block::labelled("variable", "tags")
        .string("description", "Common tags for all resources")
        .attr("type", "map(string)")
        .attr("default", format!("{{ ManagedBy = {} }}", quote(MANAGED_BY)))
        .render()
}

/// Provider pin and configuration. Unknown providers yield an empty file.
fn generate_provider(cloud: &CloudConfig) -> String {
    match cloud.provider.as_str() {
        "aws" => {
            let terraform = Block::new("terraform").block(Block::new("required_providers").attr(
                "aws",
                format!(
                    "{{ source = {}, version = {} }}",
                    quote(AWS_PROVIDER_SOURCE),
                    quote(AWS_PROVIDER_VERSION)
                ),
            ));
            let mut provider = Block::labelled("provider", "aws");
            if !cloud.region.is_empty() {
                provider.push_string("region", &cloud.region);
            }
            format!("{}\n{}", terraform.render(), provider.render())
        }
        _ => String::new(),
    }
}
