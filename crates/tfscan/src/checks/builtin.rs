//! Built-in check catalog
//!
//! A handful of checks, one or more per registry kind. Custom checks are registered the
//! same way, through [Registry::register](super::Registry::register).
use super::{
    Check, CheckError, CheckOutcome, Entity, GraphCheck, GraphCheckResult, GraphRegistry,
    Registries,
};
use crate::graph::ReferenceGraph;
use crate::value::Value;

const PUBLIC_ACLS: [&str; 3] = ["public-read", "public-read-write", "website"];
const OPEN_CIDRS: [&str; 2] = ["0.0.0.0/0", "::/0"];
const SSH_PORT: i64 = 22;

/// Registries holding every built-in per-block check
pub fn registries() -> Registries {
    let mut registries = Registries::default();
    registries.resource.register(S3PublicAcl);
    registries.resource.register(SecurityGroupOpenSsh);
    registries.provider.register(ProviderCredentials);
    registries.module.register(ModuleSourcePinned);
    registries
}

/// Registry holding every built-in relational check
pub fn graph_registry() -> GraphRegistry {
    let mut registry = GraphRegistry::default();
    registry.register(S3PublicAccessBlock);
    registry
}

/// S3 bucket ACL must not grant public access
pub struct S3PublicAcl;

impl Check for S3PublicAcl {
    fn id(&self) -> &str {
        "CKV_AWS_20"
    }

    fn name(&self) -> &str {
        "S3 bucket ACL does not allow public access"
    }

    fn supported_entities(&self) -> &[&str] {
        &["aws_s3_bucket", "aws_s3_bucket_acl"]
    }

    fn scan_entity(&self, entity: &Entity<'_>) -> Result<CheckOutcome, CheckError> {
        let public = entity
            .config
            .get("acl")
            .and_then(Value::as_str)
            .is_some_and(|acl| PUBLIC_ACLS.contains(&acl));

        Ok(if public {
            CheckOutcome::Failed
        } else {
            CheckOutcome::Passed
        })
    }

    fn evaluated_keys(&self) -> Vec<String> {
        vec!["acl".into()]
    }
}

/// No ingress from anywhere to port 22
pub struct SecurityGroupOpenSsh;

impl SecurityGroupOpenSsh {
    fn is_open_ssh(rule: &Value) -> Result<bool, CheckError> {
        if rule.as_object().is_none() {
            return Err(CheckError::UnexpectedShape("ingress".into()));
        }

        let from = rule.get("from_port").and_then(Value::as_i64);
        let to = rule.get("to_port").and_then(Value::as_i64);
        let covers_ssh = match (from, to) {
            (Some(from), Some(to)) => from <= SSH_PORT && SSH_PORT <= to,
            // unresolved ports cannot be judged
            _ => false,
        };

        let open = ["cidr_blocks", "ipv6_cidr_blocks"]
            .iter()
            .filter_map(|key| rule.get(key))
            .flat_map(Value::members)
            .filter_map(Value::as_str)
            .any(|cidr| OPEN_CIDRS.contains(&cidr));

        Ok(covers_ssh && open)
    }
}

impl Check for SecurityGroupOpenSsh {
    fn id(&self) -> &str {
        "CKV_AWS_24"
    }

    fn name(&self) -> &str {
        "Security group does not allow ingress from 0.0.0.0/0 to port 22"
    }

    fn supported_entities(&self) -> &[&str] {
        &["aws_security_group", "aws_security_group_rule"]
    }

    fn scan_entity(&self, entity: &Entity<'_>) -> Result<CheckOutcome, CheckError> {
        let rules: Vec<&Value> = if entity.entity_type == "aws_security_group_rule" {
            match entity.config.get("type").and_then(Value::as_str) {
                Some("ingress") => vec![entity.config],
                _ => vec![],
            }
        } else {
            entity
                .config
                .get("ingress")
                .map(|ingress| ingress.members().collect())
                .unwrap_or_default()
        };

        for rule in rules {
            if Self::is_open_ssh(rule)? {
                return Ok(CheckOutcome::Failed);
            }
        }
        Ok(CheckOutcome::Passed)
    }

    fn evaluated_keys(&self) -> Vec<String> {
        vec!["ingress".into(), "cidr_blocks".into(), "from_port".into(), "to_port".into()]
    }
}

/// Provider credentials must not be written into the configuration
pub struct ProviderCredentials;

impl ProviderCredentials {
    const KEYS: [&'static str; 2] = ["access_key", "secret_key"];
}

impl Check for ProviderCredentials {
    fn id(&self) -> &str {
        "CKV_AWS_41"
    }

    fn name(&self) -> &str {
        "No hard coded AWS access key and secret key in provider"
    }

    fn supported_entities(&self) -> &[&str] {
        &["aws"]
    }

    fn scan_entity(&self, entity: &Entity<'_>) -> Result<CheckOutcome, CheckError> {
        let hardcoded = Self::KEYS.iter().any(|key| {
            entity.config.get(key).is_some_and(|value| {
                !value.is_unresolved() && value.as_str().is_some_and(|s| !s.is_empty())
            })
        });

        Ok(if hardcoded {
            CheckOutcome::Failed
        } else {
            CheckOutcome::Passed
        })
    }

    fn evaluated_keys(&self) -> Vec<String> {
        Self::KEYS.iter().map(|key| key.to_string()).collect()
    }

    fn is_secret(&self) -> bool {
        true
    }
}

/// Remote module sources must be pinned to a version or revision
pub struct ModuleSourcePinned;

impl Check for ModuleSourcePinned {
    fn id(&self) -> &str {
        "CKV_TF_1"
    }

    fn name(&self) -> &str {
        "Module source is pinned to a version"
    }

    fn supported_entities(&self) -> &[&str] {
        &["module"]
    }

    fn scan_entity(&self, entity: &Entity<'_>) -> Result<CheckOutcome, CheckError> {
        let Some(source) = entity.config.get("source").and_then(Value::as_str) else {
            return Err(CheckError::UnexpectedShape("source".into()));
        };

        let pinned = if source.starts_with("./") || source.starts_with("../") {
            true
        } else if source.contains("::") || source.contains("://") || source.starts_with("git@") {
            source.contains("?ref=") || source.contains("&ref=")
        } else {
            // registry source
            entity.config.get("version").is_some()
        };

        Ok(if pinned {
            CheckOutcome::Passed
        } else {
            CheckOutcome::Failed
        })
    }

    fn evaluated_keys(&self) -> Vec<String> {
        vec!["source".into(), "version".into()]
    }
}

/// Every S3 bucket has a public access block referring to it
pub struct S3PublicAccessBlock;

impl GraphCheck for S3PublicAccessBlock {
    fn id(&self) -> &str {
        "CKV2_AWS_6"
    }

    fn name(&self) -> &str {
        "S3 bucket has a public access block"
    }

    fn run(&self, graph: &ReferenceGraph) -> Vec<GraphCheckResult> {
        graph
            .resources_of_type("aws_s3_bucket")
            .map(|(bucket, _)| {
                let access_block = graph.referenced_by(bucket).find_map(|(attribute, source)| {
                    let vertex = graph.vertex(source);
                    (attribute == "bucket"
                        && vertex.resource_type == "aws_s3_bucket_public_access_block")
                        .then_some(source)
                });

                GraphCheckResult {
                    entity: bucket,
                    result: match access_block {
                        Some(_) => CheckOutcome::Passed,
                        None => CheckOutcome::Failed,
                    },
                    connected: access_block,
                }
            })
            .collect()
    }

    fn evaluated_keys(&self) -> Vec<String> {
        vec!["bucket".into()]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::address::assign_addresses;
    use crate::definitions;
    use crate::definitions::BlockType;
    use crate::object;
    use pretty_assertions::assert_eq;

    fn scan(check: &dyn Check, entity_type: &str, config: &Value) -> CheckOutcome {
        let entity = Entity {
            block_type: BlockType::Resource,
            entity_type,
            name: "test",
            config,
        };
        check.scan_entity(&entity).unwrap()
    }

    #[test]
    fn public_acl() {
        assert_eq!(
            scan(&S3PublicAcl, "aws_s3_bucket", &object! { "acl" => "public-read" }),
            CheckOutcome::Failed
        );
        assert_eq!(
            scan(&S3PublicAcl, "aws_s3_bucket", &object! { "acl" => "private" }),
            CheckOutcome::Passed
        );
        assert_eq!(scan(&S3PublicAcl, "aws_s3_bucket", &object! {}), CheckOutcome::Passed);
    }

    #[test]
    fn open_ssh_ingress() {
        let open = object! {
            "ingress" => vec![
                object! { "from_port" => 443i64, "to_port" => 443i64, "cidr_blocks" => vec!["0.0.0.0/0"] },
                object! { "from_port" => 0i64, "to_port" => 1024i64, "cidr_blocks" => vec!["0.0.0.0/0"] },
            ]
        };
        let internal = object! {
            "ingress" => vec![
                object! { "from_port" => 22i64, "to_port" => 22i64, "cidr_blocks" => vec!["10.0.0.0/8"] },
            ]
        };
        assert_eq!(scan(&SecurityGroupOpenSsh, "aws_security_group", &open), CheckOutcome::Failed);
        assert_eq!(
            scan(&SecurityGroupOpenSsh, "aws_security_group", &internal),
            CheckOutcome::Passed
        );
    }

    #[test]
    fn malformed_ingress_is_an_error() {
        let config = object! { "ingress" => "${var.rules}" };
        let entity = Entity {
            block_type: BlockType::Resource,
            entity_type: "aws_security_group",
            name: "test",
            config: &config,
        };
        assert!(SecurityGroupOpenSsh.scan_entity(&entity).is_err());
    }

    #[test]
    fn provider_credentials() {
        assert_eq!(
            scan(&ProviderCredentials, "aws", &object! { "secret_key" => "wJalrXUtnFEMI" }),
            CheckOutcome::Failed
        );
        assert_eq!(
            scan(&ProviderCredentials, "aws", &object! { "secret_key" => "${var.secret}" }),
            CheckOutcome::Passed
        );
    }

    #[test]
    fn module_source_pinning() {
        let cases = [
            (object! { "source" => "./network" }, CheckOutcome::Passed),
            (object! { "source" => "git::https://example.com/net.git" }, CheckOutcome::Failed),
            (
                object! { "source" => "git::https://example.com/net.git?ref=v1.2.0" },
                CheckOutcome::Passed,
            ),
            (object! { "source" => "terraform-aws-modules/vpc/aws" }, CheckOutcome::Failed),
            (
                object! { "source" => "terraform-aws-modules/vpc/aws", "version" => "5.0.0" },
                CheckOutcome::Passed,
            ),
        ];
        for (config, expected) in cases {
            assert_eq!(scan(&ModuleSourcePinned, "module", &config), expected, "{config:?}");
        }
    }

    #[test]
    fn public_access_block_is_a_connected_node() {
        let mut definitions = definitions! {
            "main.tf" => r#"
resource "aws_s3_bucket" "logs" {
  bucket = "logs"
}

resource "aws_s3_bucket" "assets" {
  bucket = "assets"
}

resource "aws_s3_bucket_public_access_block" "logs" {
  bucket = aws_s3_bucket.logs.id
}
"#
        };
        assign_addresses(&mut definitions);
        let graph = ReferenceGraph::build(&definitions);

        let results: Vec<(String, CheckOutcome, Option<String>)> = S3PublicAccessBlock
            .run(&graph)
            .into_iter()
            .map(|result| {
                (
                    graph.vertex(result.entity).address.clone(),
                    result.result,
                    result.connected.map(|index| graph.vertex(index).address.clone()),
                )
            })
            .collect();

        assert_eq!(
            results,
            vec![
                (
                    "aws_s3_bucket.logs".to_string(),
                    CheckOutcome::Passed,
                    Some("aws_s3_bucket_public_access_block.logs".to_string())
                ),
                ("aws_s3_bucket.assets".to_string(), CheckOutcome::Failed, None),
            ]
        );
    }
}
