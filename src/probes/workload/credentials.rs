//! `cloud-credentials`: one handler per provider for the credential
//! artifacts federation is expected to inject.

use std::path::{Path, PathBuf};

use crate::classify::{Classify, ProbeMeta};
use crate::core::{ProbeResult, Scope};
use crate::probes::Probe;
use crate::probes::federation::{IdentifierShape, Provider, identifier_shape, is_placeholder};
use crate::probes::workload::WorkloadContext;

const CLOUD_CREDENTIALS: ProbeMeta =
    ProbeMeta::new("cloud-credentials", Scope::Workload, "cloud credentials");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenFile {
    Present,
    NotDeclared,
    Missing(PathBuf),
    Empty(PathBuf),
    Unreadable { path: PathBuf, reason: String },
}

impl TokenFile {
    fn inspect(declared: Option<&str>) -> TokenFile {
        let Some(path) = declared else {
            return TokenFile::NotDeclared;
        };
        let path = PathBuf::from(path);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => TokenFile::Present,
            Ok(meta) if meta.is_file() => TokenFile::Empty(path),
            Ok(_) => TokenFile::Unreadable {
                path,
                reason: "not a regular file".to_string(),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => TokenFile::Missing(path),
            Err(err) => TokenFile::Unreadable {
                path,
                reason: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOutcome {
    NoProvider,
    Federated {
        provider: Provider,
        identifier: String,
        shape: IdentifierShape,
        token: TokenFile,
    },
    /// EKS Pod Identity agent endpoint.
    ContainerCredentials,
    StaticKeys { placeholder: bool },
    Missing { provider: Provider, variables: Vec<&'static str> },
}

fn aws(ctx: &WorkloadContext<'_>) -> CredentialOutcome {
    if let Some(role) = ctx.env_var("AWS_ROLE_ARN") {
        return CredentialOutcome::Federated {
            provider: Provider::Aws,
            identifier: role.to_string(),
            shape: identifier_shape(Provider::Aws, role),
            token: TokenFile::inspect(ctx.env_var("AWS_WEB_IDENTITY_TOKEN_FILE")),
        };
    }
    if ctx.env_var("AWS_CONTAINER_CREDENTIALS_FULL_URI").is_some()
        && ctx.env_var("AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE").is_some()
    {
        return CredentialOutcome::ContainerCredentials;
    }
    match (ctx.env_var("AWS_ACCESS_KEY_ID"), ctx.env_var("AWS_SECRET_ACCESS_KEY")) {
        (Some(id), Some(secret)) => CredentialOutcome::StaticKeys {
            placeholder: is_placeholder(id) || is_placeholder(secret),
        },
        _ => CredentialOutcome::Missing {
            provider: Provider::Aws,
            variables: vec!["AWS_ROLE_ARN", "AWS_WEB_IDENTITY_TOKEN_FILE"],
        },
    }
}

fn azure(ctx: &WorkloadContext<'_>) -> CredentialOutcome {
    let mut missing = Vec::new();
    for key in ["AZURE_CLIENT_ID", "AZURE_TENANT_ID", "AZURE_FEDERATED_TOKEN_FILE"] {
        if ctx.env_var(key).is_none() {
            missing.push(key);
        }
    }
    let Some(client_id) = ctx.env_var("AZURE_CLIENT_ID") else {
        return CredentialOutcome::Missing {
            provider: Provider::Azure,
            variables: missing,
        };
    };
    if ctx.env_var("AZURE_TENANT_ID").is_none() {
        return CredentialOutcome::Missing {
            provider: Provider::Azure,
            variables: missing,
        };
    }
    CredentialOutcome::Federated {
        provider: Provider::Azure,
        identifier: client_id.to_string(),
        shape: identifier_shape(Provider::Azure, client_id),
        token: TokenFile::inspect(ctx.env_var("AZURE_FEDERATED_TOKEN_FILE")),
    }
}

/// With no declared provider, injected federation variables pick the
/// handler.
pub fn inspect(ctx: &WorkloadContext<'_>) -> CredentialOutcome {
    let provider = match ctx.provider() {
        Provider::Unknown if ctx.env_var("AWS_ROLE_ARN").is_some() => Provider::Aws,
        Provider::Unknown if ctx.env_var("AZURE_CLIENT_ID").is_some() => Provider::Azure,
        other => other,
    };
    match provider {
        Provider::Aws => aws(ctx),
        Provider::Azure => azure(ctx),
        Provider::Unknown => CredentialOutcome::NoProvider,
    }
}

fn token_path(path: &Path) -> String {
    path.display().to_string()
}

impl Classify for CredentialOutcome {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        match self {
            CredentialOutcome::NoProvider => meta.info(
                "no cloud provider declared; set CLOUD_PROVIDER to aws or azure to check credentials",
            ),
            CredentialOutcome::ContainerCredentials => {
                meta.pass("aws credentials served by the EKS Pod Identity agent")
            }
            CredentialOutcome::StaticKeys { placeholder: true } => meta.fail(
                "static AWS keys are unrendered placeholders",
                "Provide real credentials, or better, remove the static keys and annotate the service account for IRSA.",
            ),
            CredentialOutcome::StaticKeys { placeholder: false } => meta.warn(
                "using static AWS access keys instead of federation",
                "Annotate the service account with eks.amazonaws.com/role-arn and drop AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY from the pod.",
            ),
            CredentialOutcome::Missing { provider, variables } => meta.fail(
                format!(
                    "no {provider} credentials found (missing {})",
                    variables.join(", ")
                ),
                match provider {
                    Provider::Azure => {
                        "Label the pod azure.workload.identity/use=true and annotate its service account with azure.workload.identity/client-id so the webhook injects credentials."
                    }
                    _ => {
                        "Annotate the service account with eks.amazonaws.com/role-arn and restart the pod so the IRSA webhook injects credentials."
                    }
                },
            ),
            CredentialOutcome::Federated {
                provider,
                identifier,
                shape,
                token,
            } => {
                match shape {
                    IdentifierShape::Placeholder => {
                        return meta.fail(
                            format!("{provider} federation identifier is a placeholder: {identifier}"),
                            "Render the real role ARN or client id into the service account annotation.",
                        );
                    }
                    IdentifierShape::Malformed => {
                        return meta.warn(
                            format!("{provider} federation identifier looks malformed: {identifier}"),
                            "Check the service account annotation value; expected an IAM role ARN (aws) or a GUID client id (azure).",
                        );
                    }
                    IdentifierShape::Valid => {}
                }
                let remediation =
                    "The federation webhook did not mount a projected token; confirm the pod was created after the service account was annotated and restart it.";
                match token {
                    TokenFile::Present => {
                        meta.pass(format!("{provider} workload identity wired ({identifier})"))
                    }
                    TokenFile::NotDeclared => meta.fail(
                        format!("{provider} identity declared but no token file variable is set"),
                        remediation,
                    ),
                    TokenFile::Missing(path) => meta.fail(
                        format!("federated token file {} does not exist", token_path(path)),
                        remediation,
                    ),
                    TokenFile::Empty(path) => meta.fail(
                        format!("federated token file {} is empty", token_path(path)),
                        remediation,
                    ),
                    TokenFile::Unreadable { path, reason } => meta.warn(
                        format!(
                            "federated token file {} is unreadable ({reason})",
                            token_path(path)
                        ),
                        "Check fsGroup and runAsUser so the container user can read the projected token.",
                    ),
                }
            }
        }
    }
}

pub struct CloudCredentials;

impl<'a> Probe<WorkloadContext<'a>> for CloudCredentials {
    fn meta(&self) -> ProbeMeta {
        CLOUD_CREDENTIALS
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        inspect(ctx).classify(&CLOUD_CREDENTIALS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use crate::probes::workload::testing::{FakeRunner, context, temp_dir, write_file};

    fn set(ctx: &mut WorkloadContext<'_>, pairs: &[(&str, &str)]) {
        for (k, v) in pairs {
            ctx.env.insert(k.to_string(), v.to_string());
        }
    }

    #[test]
    fn aws_irsa_with_token_passes() {
        let root = temp_dir("cred-irsa");
        let token = root.join("token");
        write_file(&token, "eyJ...");
        let runner = FakeRunner::missing();
        let mut ctx = context(&runner, &root);
        set(
            &mut ctx,
            &[
                ("CLOUD_PROVIDER", "aws"),
                ("AWS_ROLE_ARN", "arn:aws:iam::123456789012:role/agent"),
                ("AWS_WEB_IDENTITY_TOKEN_FILE", token.to_str().expect("utf8")),
            ],
        );
        assert_eq!(CloudCredentials.run(&ctx).status, Status::Pass);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn aws_missing_token_file_fails() {
        let root = temp_dir("cred-notoken");
        let runner = FakeRunner::missing();
        let mut ctx = context(&runner, &root);
        let absent = root.join("absent-token");
        set(
            &mut ctx,
            &[
                ("CLOUD_PROVIDER", "aws"),
                ("AWS_ROLE_ARN", "arn:aws:iam::123456789012:role/agent"),
                ("AWS_WEB_IDENTITY_TOKEN_FILE", absent.to_str().expect("utf8")),
            ],
        );
        let r = CloudCredentials.run(&ctx);
        assert_eq!(r.status, Status::Fail);
        assert!(r.message.contains("does not exist"));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn placeholder_role_fails_and_static_keys_warn() {
        let root = temp_dir("cred-static");
        let runner = FakeRunner::missing();
        let mut ctx = context(&runner, &root);
        set(&mut ctx, &[("CLOUD_PROVIDER", "aws"), ("AWS_ROLE_ARN", "<RoleArn>")]);
        assert_eq!(CloudCredentials.run(&ctx).status, Status::Fail);

        ctx.env.remove("AWS_ROLE_ARN");
        set(
            &mut ctx,
            &[("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE"), ("AWS_SECRET_ACCESS_KEY", "secret")],
        );
        assert_eq!(CloudCredentials.run(&ctx).status, Status::Warn);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn azure_without_injection_fails() {
        let root = temp_dir("cred-azure");
        let runner = FakeRunner::missing();
        let mut ctx = context(&runner, &root);
        set(&mut ctx, &[("CLOUD_PROVIDER", "azure")]);
        let r = CloudCredentials.run(&ctx);
        assert_eq!(r.status, Status::Fail);
        assert!(r.message.contains("AZURE_CLIENT_ID"));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn unknown_provider_is_informational() {
        let root = temp_dir("cred-unknown");
        let runner = FakeRunner::missing();
        let ctx = context(&runner, &root);
        assert_eq!(CloudCredentials.run(&ctx).status, Status::Info);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn undeclared_provider_with_placeholder_role_still_fails() {
        let root = temp_dir("cred-infer-aws");
        let runner = FakeRunner::missing();
        let mut ctx = context(&runner, &root);
        let absent = root.join("absent-token");
        set(
            &mut ctx,
            &[
                ("AWS_ROLE_ARN", "<RoleArn>"),
                ("AWS_WEB_IDENTITY_TOKEN_FILE", absent.to_str().expect("utf8")),
            ],
        );
        let r = CloudCredentials.run(&ctx);
        assert_eq!(r.status, Status::Fail);
        assert!(r.message.contains("placeholder"), "{}", r.message);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn undeclared_provider_with_azure_client_id_uses_azure_checks() {
        let root = temp_dir("cred-infer-azure");
        let runner = FakeRunner::missing();
        let mut ctx = context(&runner, &root);
        set(
            &mut ctx,
            &[("AZURE_CLIENT_ID", "0b1c2d3e-4f50-6172-8394-a5b6c7d8e9f0")],
        );
        let r = CloudCredentials.run(&ctx);
        assert_eq!(r.status, Status::Fail);
        assert!(r.message.contains("AZURE_TENANT_ID"), "{}", r.message);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn malformed_role_arn_warns() {
        let root = temp_dir("cred-malformed");
        let runner = FakeRunner::missing();
        let mut ctx = context(&runner, &root);
        set(&mut ctx, &[("CLOUD_PROVIDER", "aws"), ("AWS_ROLE_ARN", "role/agent")]);
        let r = CloudCredentials.run(&ctx);
        assert_eq!(r.status, Status::Warn);
        assert!(r.message.contains("malformed"), "{}", r.message);
        assert!(r.remediation.is_some());
        let _ = std::fs::remove_dir_all(&root);
    }
}
