//! Keystone graph compiler.
//!
//! Turns a [`ResourceGraph`] drawn by a user into the four Terraform files
//! (`main.tf`, `variables.tf`, `outputs.tf`, `provider.tf`) that the engine
//! hands to the provisioning tool.
//!
//! Compilation is a pure function of the graph and the [`CloudConfig`]: it
//! never touches the filesystem or the network.
//!
//! # Example
//!
//! ```
//! use keystone_compiler::{CloudConfig, GraphCompiler, Node, ResourceGraph};
//!
//! let graph = ResourceGraph::new(
//!     vec![Node::new("logs", "aws_s3_bucket").with_property("bucket_name", "app-logs")],
//!     vec![],
//! );
//! let code = GraphCompiler::new()
//!     .compile(&graph, &CloudConfig::new("aws", "eu-west-1"))
//!     .unwrap();
//!
//! assert!(code.main.contains("resource \"aws_s3_bucket\" \"logs\""));
//! ```

#![forbid(unsafe_code)]

pub mod compiler;
pub mod error;
pub mod graph;
pub mod hcl;
pub mod resource;

pub use compiler::{CompiledCode, GraphCompiler};
pub use error::{CompileError, CompileResult};
pub use graph::{CloudConfig, Edge, Node, Position, Properties, ResourceGraph};
pub use resource::ResourceKind;
