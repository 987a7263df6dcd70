//! Cloud-provider federation vocabulary shared by both scopes: which
//! provider is declared, and what well-formed federation identifiers look
//! like.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Environment variable the packaging uses to declare the provider.
pub const PROVIDER_ENV: &str = "CLOUD_PROVIDER";

pub const AWS_ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";
pub const AZURE_CLIENT_ID_ANNOTATION: &str = "azure.workload.identity/client-id";
pub const AZURE_USE_LABEL: &str = "azure.workload.identity/use";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Azure,
    Unknown,
}

impl Provider {
    pub const fn as_str(self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Unknown => "unknown",
        }
    }

    /// Lenient detection from a declared value; anything unrecognised is
    /// `Unknown`.
    pub fn detect(value: Option<&str>) -> Provider {
        value
            .and_then(|v| v.parse::<Provider>().ok())
            .unwrap_or(Provider::Unknown)
    }

    pub fn default_dns_hosts(self, region: Option<&str>) -> Vec<String> {
        match self {
            Provider::Aws => {
                let mut hosts = vec!["sts.amazonaws.com".to_string()];
                if let Some(region) = region.map(str::trim).filter(|r| !r.is_empty()) {
                    hosts.push(format!("sts.{region}.amazonaws.com"));
                }
                hosts
            }
            Provider::Azure => vec!["login.microsoftonline.com".to_string()],
            Provider::Unknown => Vec::new(),
        }
    }

    pub fn default_https_endpoints(self, region: Option<&str>) -> Vec<String> {
        self.default_dns_hosts(region)
            .into_iter()
            .map(|host| format!("https://{host}"))
            .collect()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" | "eks" => Ok(Provider::Aws),
            "azure" | "aks" => Ok(Provider::Azure),
            "unknown" => Ok(Provider::Unknown),
            other => Err(format!("invalid cloud provider: {other} (expected aws|azure)")),
        }
    }
}

/// Unrendered template values: `<RoleArn>`, `{{ .Values.x }}`, `${VAR}`, or
/// well-known filler words.
pub fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    if v.contains('<') && v.contains('>') {
        return true;
    }
    if v.contains("{{") || v.contains("${") {
        return true;
    }
    matches!(
        v.to_ascii_lowercase().as_str(),
        "changeme" | "change-me" | "replace-me" | "replace_me" | "placeholder" | "todo" | "xxx"
    )
}

pub fn is_role_arn(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^arn:aws(-cn|-us-gov)?:iam::\d{12}:role/[\w+=,.@/-]{1,512}$")
            .expect("valid regex")
    })
    .is_match(value.trim())
}

pub fn is_guid(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("valid regex")
    })
    .is_match(value.trim())
}

/// How a declared federation identifier looks, independent of provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierShape {
    Valid,
    Placeholder,
    Malformed,
}

pub fn identifier_shape(provider: Provider, value: &str) -> IdentifierShape {
    if is_placeholder(value) {
        return IdentifierShape::Placeholder;
    }
    let valid = match provider {
        Provider::Aws => is_role_arn(value),
        Provider::Azure => is_guid(value),
        Provider::Unknown => !value.trim().is_empty(),
    };
    if valid {
        IdentifierShape::Valid
    } else {
        IdentifierShape::Malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_aliases_parse() {
        assert_eq!("EKS".parse::<Provider>(), Ok(Provider::Aws));
        assert_eq!("aks".parse::<Provider>(), Ok(Provider::Azure));
        assert!("gcp".parse::<Provider>().is_err());
        assert_eq!(Provider::detect(Some("gcp")), Provider::Unknown);
        assert_eq!(Provider::detect(None), Provider::Unknown);
    }

    #[test]
    fn placeholders_are_recognised() {
        assert!(is_placeholder("arn:aws:iam::<AccountId>:role/<RoleName>"));
        assert!(is_placeholder("<MatillionAgentId>"));
        assert!(is_placeholder("{{ .Values.serviceAccount.roleArn }}"));
        assert!(is_placeholder("CHANGEME"));
        assert!(!is_placeholder("arn:aws:iam::123456789012:role/agent"));
    }

    #[test]
    fn role_arn_shape() {
        assert!(is_role_arn("arn:aws:iam::123456789012:role/test-role"));
        assert!(is_role_arn("arn:aws-us-gov:iam::123456789012:role/path/agent"));
        assert!(!is_role_arn("arn:aws:iam::12345:role/short-account"));
        assert!(!is_role_arn("arn:aws:s3:::bucket"));
    }

    #[test]
    fn guid_shape() {
        assert!(is_guid("0f3c2a5e-1b2c-4d5e-8f90-123456789abc"));
        assert!(is_guid(" 0F3C2A5E-1B2C-4D5E-8F90-123456789ABC "));
        assert!(!is_guid("0f3c2a5e-1b2c-4d5e-8f90"));
        assert!(!is_guid("not-a-guid"));
    }

    #[test]
    fn identifier_shape_distinguishes_placeholder_from_malformed() {
        assert_eq!(
            identifier_shape(Provider::Aws, "<RoleArn>"),
            IdentifierShape::Placeholder
        );
        assert_eq!(
            identifier_shape(Provider::Aws, "role/agent"),
            IdentifierShape::Malformed
        );
        assert_eq!(
            identifier_shape(Provider::Azure, "0f3c2a5e-1b2c-4d5e-8f90-123456789abc"),
            IdentifierShape::Valid
        );
    }

    #[test]
    fn aws_endpoints_include_region() {
        let hosts = Provider::Aws.default_dns_hosts(Some("eu-west-1"));
        assert_eq!(hosts, ["sts.amazonaws.com", "sts.eu-west-1.amazonaws.com"]);
        assert!(Provider::Unknown.default_https_endpoints(None).is_empty());
    }
}
