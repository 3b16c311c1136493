//! The resource catalog.
//!
//! Every supported node type maps to one [`ResourceKind`] variant. The set is
//! closed: adding a type means adding a variant, its required fields and its
//! renderer.

use std::fmt;

use serde_json::Value;

use crate::error::{CompileError, CompileResult};
use crate::graph::Node;
use crate::hcl::{self, Block};

/// A resource type the compiler knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `aws_instance`
    Instance,
    /// `aws_s3_bucket`
    S3Bucket,
    /// `aws_security_group`
    SecurityGroup,
    /// `aws_db_instance`
    DbInstance,
    /// `aws_vpc`
    Vpc,
    /// `aws_subnet`
    Subnet,
}

impl ResourceKind {
    /// Every kind in the catalog.
    pub const ALL: [Self; 6] = [
        Self::Instance,
        Self::S3Bucket,
        Self::SecurityGroup,
        Self::DbInstance,
        Self::Vpc,
        Self::Subnet,
    ];

    /// Look up a kind by its Terraform type name.
    #[must_use]
    pub fn from_type(resource_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_name() == resource_type)
    }

    /// Terraform resource type name.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Instance => "aws_instance",
            Self::S3Bucket => "aws_s3_bucket",
            Self::SecurityGroup => "aws_security_group",
            Self::DbInstance => "aws_db_instance",
            Self::Vpc => "aws_vpc",
            Self::Subnet => "aws_subnet",
        }
    }

    /// Properties that must be present on a node of this kind.
    #[must_use]
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Instance => &["ami", "instance_type"],
            Self::S3Bucket => &["bucket_name"],
            Self::SecurityGroup => &["name", "description"],
            Self::DbInstance => &["engine", "instance_class", "allocated_storage"],
            Self::Vpc => &["cidr_block"],
            Self::Subnet => &["vpc", "cidr_block"],
        }
    }

    /// Check that every required property is present.
    pub fn validate(self, node: &Node) -> CompileResult<()> {
        match self
            .required_fields()
            .iter()
            .find(|field| node.property(field).is_none())
        {
            Some(&field) => Err(CompileError::ValidationFailed {
                node_id: node.id.clone(),
                field,
            }),
            None => Ok(()),
        }
    }

    /// Render the node as one or more HCL resource blocks.
    ///
    /// Assumes [`validate`](Self::validate) has passed.
    pub fn render(self, node: &Node) -> CompileResult<String> {
        match self {
            Self::Instance => render_instance(node),
            Self::S3Bucket => render_s3_bucket(node),
            Self::SecurityGroup => render_security_group(node),
            Self::DbInstance => render_db_instance(node),
            Self::Vpc => render_vpc(node),
            Self::Subnet => render_subnet(node),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

fn required<'a>(node: &'a Node, field: &'static str) -> CompileResult<&'a Value> {
    node.property(field)
        .ok_or_else(|| CompileError::ValidationFailed {
            node_id: node.id.clone(),
            field,
        })
}

/// Present required scalars always render; only absence is an error.
fn required_string(node: &Node, field: &'static str) -> CompileResult<String> {
    required(node, field).map(hcl::required_string)
}

fn optional_string(node: &Node, field: &str) -> CompileResult<Option<String>> {
    node.property(field)
        .map(|value| hcl::string_property(node, field, value))
        .transpose()
}

/// Render a reference to another node's `id` attribute.
fn reference(node: &Node, field: &str, target: ResourceKind) -> CompileResult<Option<String>> {
    match node.property(field) {
        None => Ok(None),
        Some(Value::String(id)) => Ok(Some(format!("{}.{id}.id", target.type_name()))),
        Some(_) => Err(CompileError::invalid_property(
            &node.id,
            field,
            "expected a node id",
        )),
    }
}

/// `merge(var.tags, { Name = ... })` when the node has a `name`, else `var.tags`.
fn tags(node: &Node) -> CompileResult<String> {
    Ok(match optional_string(node, "name")? {
        Some(name) => format!("merge(var.tags, {{ Name = {name} }})"),
        None => "var.tags".to_owned(),
    })
}

fn render_instance(node: &Node) -> CompileResult<String> {
    let mut block = Block::resource(ResourceKind::Instance.type_name(), &node.id)
        .attr("ami", required_string(node, "ami")?)
        .attr("instance_type", required_string(node, "instance_type")?);

    if let Some(subnet) = reference(node, "subnet", ResourceKind::Subnet)? {
        block.push_attr("subnet_id", subnet);
    }

    if let Some(value) = node.property("security_group") {
        let groups: Vec<String> = hcl::strings_property(node, "security_group", value)?
            .iter()
            .map(|id| format!("{}.{id}.id", ResourceKind::SecurityGroup.type_name()))
            .collect();
        block.push_attr("vpc_security_group_ids", format!("[{}]", groups.join(", ")));
    }

    block.push_attr("tags", tags(node)?);
    Ok(block.render())
}

fn render_s3_bucket(node: &Node) -> CompileResult<String> {
    let mut out = Block::resource(ResourceKind::S3Bucket.type_name(), &node.id)
        .attr("bucket", required_string(node, "bucket_name")?)
        .attr("tags", "var.tags")
        .render();

    let versioning = node
        .property("versioning")
        .map(|value| hcl::bool_property(node, "versioning", value))
        .transpose()?
        .unwrap_or(false);

    if versioning {
        out.push('\n');
        out.push_str(
            &Block::resource("aws_s3_bucket_versioning", &format!("{}_versioning", node.id))
                .attr(
                    "bucket",
                    format!("{}.{}.id", ResourceKind::S3Bucket.type_name(), node.id),
                )
                .block(Block::new("versioning_configuration").string("status", "Enabled"))
                .render(),
        );
    }

    Ok(out)
}

fn render_security_group(node: &Node) -> CompileResult<String> {
    let mut block = Block::resource(ResourceKind::SecurityGroup.type_name(), &node.id)
        .attr("name", required_string(node, "name")?)
        .attr("description", required_string(node, "description")?);

    if let Some(vpc) = reference(node, "vpc", ResourceKind::Vpc)? {
        block.push_attr("vpc_id", vpc);
    }

    if let Some(rules) = node.property("ingress") {
        let rules = rules.as_array().ok_or_else(|| {
            CompileError::invalid_property(&node.id, "ingress", "expected a list of rules")
        })?;
        for (idx, rule) in rules.iter().enumerate() {
            block.push_block(ingress_rule(node, idx, rule)?);
        }
    }

    block.push_block(
        Block::new("egress")
            .attr("from_port", "0")
            .attr("to_port", "0")
            .string("protocol", "-1")
            .attr("cidr_blocks", hcl::string_list(&["0.0.0.0/0"])),
    );
    block.push_attr("tags", "var.tags");
    Ok(block.render())
}

fn ingress_rule(node: &Node, idx: usize, rule: &Value) -> CompileResult<Block> {
    let field = |name: &str| format!("ingress[{idx}].{name}");
    let rule = rule.as_object().ok_or_else(|| {
        CompileError::invalid_property(&node.id, format!("ingress[{idx}]"), "expected an object")
    })?;
    let get = |name: &str| {
        rule.get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| CompileError::invalid_property(&node.id, field(name), "missing"))
    };

    let mut block = Block::new("ingress");
    if let Some(description) = rule.get("description").and_then(Value::as_str) {
        block.push_string("description", description);
    }
    block.push_attr(
        "from_port",
        hcl::number_property(node, &field("from_port"), get("from_port")?)?,
    );
    block.push_attr(
        "to_port",
        hcl::number_property(node, &field("to_port"), get("to_port")?)?,
    );
    block.push_attr(
        "protocol",
        hcl::string_property(node, &field("protocol"), get("protocol")?)?,
    );
    let cidrs = hcl::strings_property(node, &field("cidr_blocks"), get("cidr_blocks")?)?;
    block.push_attr("cidr_blocks", hcl::string_list(&cidrs));
    Ok(block)
}

fn render_db_instance(node: &Node) -> CompileResult<String> {
    let mut block = Block::resource(ResourceKind::DbInstance.type_name(), &node.id)
        .attr("engine", required_string(node, "engine")?);

    if let Some(version) = optional_string(node, "engine_version")? {
        block.push_attr("engine_version", version);
    }
    block.push_attr("instance_class", required_string(node, "instance_class")?);
    block.push_attr(
        "allocated_storage",
        hcl::required_number(required(node, "allocated_storage")?),
    );
    for field in ["db_name", "username", "password"] {
        if let Some(value) = optional_string(node, field)? {
            block.push_attr(field, value);
        }
    }
    block.push_attr("skip_final_snapshot", "true");
    block.push_attr("tags", "var.tags");
    Ok(block.render())
}

fn render_vpc(node: &Node) -> CompileResult<String> {
    Ok(Block::resource(ResourceKind::Vpc.type_name(), &node.id)
        .attr("cidr_block", required_string(node, "cidr_block")?)
        .attr("enable_dns_support", "true")
        .attr("enable_dns_hostnames", "true")
        .attr("tags", tags(node)?)
        .render())
}

fn render_subnet(node: &Node) -> CompileResult<String> {
    let vpc = format!(
        "{}.{}.id",
        ResourceKind::Vpc.type_name(),
        hcl::text(required(node, "vpc")?)
    );

    let mut block = Block::resource(ResourceKind::Subnet.type_name(), &node.id)
        .attr("vpc_id", vpc)
        .attr("cidr_block", required_string(node, "cidr_block")?);

    if let Some(zone) = optional_string(node, "availability_zone")? {
        block.push_attr("availability_zone", zone);
    }
    block.push_attr("tags", tags(node)?);
    Ok(block.render())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn complete_node(kind: ResourceKind) -> Node {
        let node = Node::new("res", kind.type_name());
        match kind {
            ResourceKind::Instance => node
                .with_property("ami", "ami-123")
                .with_property("instance_type", "t3.micro"),
            ResourceKind::S3Bucket => node.with_property("bucket_name", "logs"),
            ResourceKind::SecurityGroup => node
                .with_property("name", "web")
                .with_property("description", "web traffic"),
            ResourceKind::DbInstance => node
                .with_property("engine", "postgres")
                .with_property("instance_class", "db.t3.micro")
                .with_property("allocated_storage", 20),
            ResourceKind::Vpc => node.with_property("cidr_block", "10.0.0.0/16"),
            ResourceKind::Subnet => node
                .with_property("vpc", "main")
                .with_property("cidr_block", "10.0.1.0/24"),
        }
    }

    #[test]
    fn lookup_by_type_name() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_type(kind.type_name()), Some(kind));
        }
        assert_eq!(ResourceKind::from_type("aws_lambda_function"), None);
    }

    #[rstest]
    #[case(ResourceKind::Instance)]
    #[case(ResourceKind::S3Bucket)]
    #[case(ResourceKind::SecurityGroup)]
    #[case(ResourceKind::DbInstance)]
    #[case(ResourceKind::Vpc)]
    #[case(ResourceKind::Subnet)]
    fn complete_node_validates_and_renders(#[case] kind: ResourceKind) {
        let node = complete_node(kind);
        kind.validate(&node).expect("complete node should validate");
        let rendered = kind.render(&node).expect("complete node should render");
        assert!(rendered.starts_with(&format!("resource \"{kind}\" \"res\" {{")));
    }

    #[rstest]
    #[case(ResourceKind::Instance)]
    #[case(ResourceKind::S3Bucket)]
    #[case(ResourceKind::SecurityGroup)]
    #[case(ResourceKind::DbInstance)]
    #[case(ResourceKind::Vpc)]
    #[case(ResourceKind::Subnet)]
    fn each_missing_required_field_fails(#[case] kind: ResourceKind) {
        for &field in kind.required_fields() {
            let mut node = complete_node(kind);
            node.properties.remove(field);

            let err = kind.validate(&node).expect_err("validation should fail");
            assert_eq!(
                err,
                CompileError::ValidationFailed {
                    node_id: "res".to_owned(),
                    field,
                }
            );
        }
    }

    #[test]
    fn instance_with_references() {
        let node = complete_node(ResourceKind::Instance)
            .with_property("name", "web-1")
            .with_property("security_group", "web_sg")
            .with_property("subnet", "public");

        let rendered = ResourceKind::Instance.render(&node).expect("render");
        let expected = "\
resource \"aws_instance\" \"res\" {
  ami                    = \"ami-123\"
  instance_type          = \"t3.micro\"
  subnet_id              = aws_subnet.public.id
  vpc_security_group_ids = [aws_security_group.web_sg.id]
  tags                   = merge(var.tags, { Name = \"web-1\" })
}
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn instance_rejects_non_string_reference() {
        let node = complete_node(ResourceKind::Instance).with_property("subnet", 7);
        let err = ResourceKind::Instance.render(&node).expect_err("should fail");
        assert!(matches!(err, CompileError::InvalidProperty { ref field, .. } if field == "subnet"));
    }

    #[test]
    fn s3_bucket_versioning_adds_resource() {
        let node = complete_node(ResourceKind::S3Bucket).with_property("versioning", true);
        let rendered = ResourceKind::S3Bucket.render(&node).expect("render");
        assert!(rendered.contains("resource \"aws_s3_bucket_versioning\" \"res_versioning\""));
        assert!(rendered.contains("bucket = aws_s3_bucket.res.id"));
        assert!(rendered.contains("status = \"Enabled\""));

        let plain = ResourceKind::S3Bucket
            .render(&complete_node(ResourceKind::S3Bucket))
            .expect("render");
        assert!(!plain.contains("aws_s3_bucket_versioning"));
    }

    #[test]
    fn security_group_ingress_rules() {
        let node = complete_node(ResourceKind::SecurityGroup)
            .with_property("vpc", "main")
            .with_property(
                "ingress",
                json!([
                    {"from_port": 22, "to_port": 22, "protocol": "tcp", "cidr_blocks": "10.0.0.0/8"},
                    {"from_port": "443", "to_port": 443, "protocol": "tcp",
                     "cidr_blocks": ["0.0.0.0/0"], "description": "https"}
                ]),
            );

        let rendered = ResourceKind::SecurityGroup.render(&node).expect("render");
        assert!(rendered.contains("vpc_id      = aws_vpc.main.id"));
        assert_eq!(rendered.matches("  ingress {").count(), 2);
        assert!(rendered.contains("cidr_blocks = [\"10.0.0.0/8\"]"));
        assert!(rendered.contains("description = \"https\""));
        assert!(rendered.contains("protocol    = \"-1\""));
        assert!(rendered.trim_end().ends_with("tags = var.tags\n}"));
    }

    #[test]
    fn security_group_malformed_rule() {
        let node = complete_node(ResourceKind::SecurityGroup)
            .with_property("ingress", json!([{"from_port": 22}]));
        let err = ResourceKind::SecurityGroup.render(&node).expect_err("should fail");
        assert!(err.to_string().contains("ingress[0].to_port"));

        let node = complete_node(ResourceKind::SecurityGroup).with_property("ingress", json!(["ssh"]));
        assert!(ResourceKind::SecurityGroup.render(&node).is_err());
    }

    #[test]
    fn subnet_references_vpc() {
        let node = complete_node(ResourceKind::Subnet).with_property("availability_zone", "eu-west-1a");
        let rendered = ResourceKind::Subnet.render(&node).expect("render");
        assert!(rendered.contains("vpc_id            = aws_vpc.main.id"));
        assert!(rendered.contains("availability_zone = \"eu-west-1a\""));
    }

    #[rstest]
    #[case(ResourceKind::Instance, "ami", json!({"id": "ami-1"}))]
    #[case(ResourceKind::Instance, "instance_type", json!(3))]
    #[case(ResourceKind::S3Bucket, "bucket_name", json!(["logs"]))]
    #[case(ResourceKind::SecurityGroup, "name", json!(true))]
    #[case(ResourceKind::SecurityGroup, "description", json!({"text": "web"}))]
    #[case(ResourceKind::DbInstance, "engine", json!(5))]
    #[case(ResourceKind::DbInstance, "instance_class", json!(["db.t3.micro"]))]
    #[case(ResourceKind::DbInstance, "allocated_storage", json!("20 GB"))]
    #[case(ResourceKind::Vpc, "cidr_block", json!(10))]
    #[case(ResourceKind::Subnet, "vpc", json!(7))]
    #[case(ResourceKind::Subnet, "cidr_block", json!(false))]
    fn present_required_field_of_any_type_renders(
        #[case] kind: ResourceKind,
        #[case] field: &str,
        #[case] value: Value,
    ) {
        let node = complete_node(kind).with_property(field, value);
        kind.validate(&node).expect("field is present");
        let rendered = kind.render(&node).expect("present field should render");
        assert!(rendered.starts_with(&format!("resource \"{kind}\" \"res\" {{")));
    }

    #[test]
    fn db_instance_numeric_storage() {
        let node = complete_node(ResourceKind::DbInstance).with_property("allocated_storage", "big");
        let rendered = ResourceKind::DbInstance.render(&node).expect("render");
        assert!(rendered.contains("allocated_storage   = \"big\""));

        let node = complete_node(ResourceKind::DbInstance).with_property("allocated_storage", "50");
        let rendered = ResourceKind::DbInstance.render(&node).expect("render");
        assert!(rendered.contains("allocated_storage   = 50"));

        let rendered = ResourceKind::DbInstance
            .render(&complete_node(ResourceKind::DbInstance))
            .expect("render");
        assert!(rendered.contains("allocated_storage   = 20"));
        assert!(rendered.contains("skip_final_snapshot = true"));
    }
}
