//! `service-account-identity`: is the target's service account wired for
//! cloud federation, one handler per provider.

use crate::classify::{Classify, ProbeMeta};
use crate::core::{ProbeResult, Scope};
use crate::kube::{KubeErrorKind, ServiceAccount};
use crate::probes::Probe;
use crate::probes::cluster::{ClusterContext, query_failed};
use crate::probes::federation::{
    AWS_ROLE_ARN_ANNOTATION, AZURE_CLIENT_ID_ANNOTATION, AZURE_USE_LABEL, IdentifierShape,
    Provider, identifier_shape,
};

const SERVICE_ACCOUNT_IDENTITY: ProbeMeta = ProbeMeta::new(
    "service-account-identity",
    Scope::Cluster,
    "service account identity",
);

const STATIC_KEY_VARS: [&str; 2] = ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    AccountMissing {
        account: String,
    },
    Undeclared {
        account: String,
    },
    Aws {
        account: String,
        role: Option<(String, IdentifierShape)>,
        static_keys: bool,
    },
    Azure {
        account: String,
        client_id: Option<(String, IdentifierShape)>,
        pod_labelled: bool,
    },
}

fn annotation<'s>(sa: &'s ServiceAccount, key: &str) -> Option<&'s str> {
    sa.metadata
        .annotations
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

pub fn inspect(
    provider: Provider,
    account: &str,
    sa: &ServiceAccount,
    pod_labelled: bool,
    static_keys: bool,
) -> IdentityOutcome {
    let role = annotation(sa, AWS_ROLE_ARN_ANNOTATION);
    let client_id = annotation(sa, AZURE_CLIENT_ID_ANNOTATION);
    let provider = match provider {
        Provider::Unknown if role.is_some() => Provider::Aws,
        Provider::Unknown if client_id.is_some() => Provider::Azure,
        other => other,
    };
    let account = account.to_string();
    match provider {
        Provider::Aws => IdentityOutcome::Aws {
            account,
            role: role.map(|r| (r.to_string(), identifier_shape(Provider::Aws, r))),
            static_keys,
        },
        Provider::Azure => IdentityOutcome::Azure {
            account,
            client_id: client_id.map(|c| (c.to_string(), identifier_shape(Provider::Azure, c))),
            pod_labelled,
        },
        Provider::Unknown => IdentityOutcome::Undeclared { account },
    }
}

fn shape_problem(
    meta: &ProbeMeta,
    provider: Provider,
    annotation: &str,
    value: &str,
    shape: IdentifierShape,
) -> Option<ProbeResult> {
    match shape {
        IdentifierShape::Valid => None,
        IdentifierShape::Placeholder => Some(meta.fail(
            format!("{annotation} is an unrendered placeholder: {value}"),
            format!("Set the real {provider} identity in the chart values and redeploy."),
        )),
        IdentifierShape::Malformed => Some(meta.warn(
            format!("{annotation} does not look like a valid {provider} identity: {value}"),
            "Correct the service account annotation value.",
        )),
    }
}

impl Classify for IdentityOutcome {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        match self {
            IdentityOutcome::AccountMissing { account } => meta.fail(
                format!("service account {account} does not exist"),
                "Create the service account the pod references, or fix serviceAccountName.",
            ),
            IdentityOutcome::Undeclared { account } => meta.info(format!(
                "service account {account} has no federation annotation and no cloud provider is declared"
            )),
            IdentityOutcome::Aws {
                account,
                role,
                static_keys,
            } => {
                if let Some((value, shape)) = role
                    && let Some(problem) =
                        shape_problem(meta, Provider::Aws, AWS_ROLE_ARN_ANNOTATION, value, *shape)
                {
                    return problem;
                }
                if *static_keys {
                    return meta.warn(
                        "static AWS access keys are set in the pod spec",
                        "Remove AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY and rely on the service account role.",
                    );
                }
                match role {
                    Some((value, _)) => {
                        meta.pass(format!("service account {account} assumes {value}"))
                    }
                    None => meta.warn(
                        format!("service account {account} has no {AWS_ROLE_ARN_ANNOTATION} annotation"),
                        format!("Annotate the service account with {AWS_ROLE_ARN_ANNOTATION}, unless EKS Pod Identity is configured for it."),
                    ),
                }
            }
            IdentityOutcome::Azure {
                account,
                client_id,
                pod_labelled,
            } => {
                let Some((value, shape)) = client_id else {
                    return meta.fail(
                        format!("service account {account} has no {AZURE_CLIENT_ID_ANNOTATION} annotation"),
                        format!("Annotate the service account with {AZURE_CLIENT_ID_ANNOTATION} set to the managed identity's client id."),
                    );
                };
                if let Some(problem) =
                    shape_problem(meta, Provider::Azure, AZURE_CLIENT_ID_ANNOTATION, value, *shape)
                {
                    return problem;
                }
                if !pod_labelled {
                    return meta.fail(
                        format!("pod is not labelled {AZURE_USE_LABEL}=true"),
                        format!("Add the {AZURE_USE_LABEL}: \"true\" label to the pod template so the webhook injects the token."),
                    );
                }
                meta.pass(format!("service account {account} federates to client id {value}"))
            }
        }
    }
}

pub struct ServiceAccountIdentity;

impl<'a> Probe<ClusterContext<'a>> for ServiceAccountIdentity {
    fn meta(&self) -> ProbeMeta {
        SERVICE_ACCOUNT_IDENTITY
    }

    fn run(&self, ctx: &ClusterContext<'a>) -> ProbeResult {
        let account = ctx
            .pod
            .spec
            .service_account_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("default");
        let sa = match ctx.service_account(account) {
            Ok(sa) => sa,
            Err(err) if err.kind == KubeErrorKind::NotFound => {
                return IdentityOutcome::AccountMissing {
                    account: account.to_string(),
                }
                .classify(&SERVICE_ACCOUNT_IDENTITY);
            }
            Err(err) => return query_failed(&SERVICE_ACCOUNT_IDENTITY, "serviceaccounts", &err),
        };
        let pod_labelled = ctx
            .pod
            .metadata
            .labels
            .get(AZURE_USE_LABEL)
            .is_some_and(|v| v == "true");
        let static_keys = ctx
            .target_container()
            .is_some_and(|c| STATIC_KEY_VARS.iter().any(|k| c.declares_env(k)));
        inspect(ctx.provider(), account, &sa, pod_labelled, static_keys)
            .classify(&SERVICE_ACCOUNT_IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use crate::probes::cluster::testing::{FakeCluster, agent_pod, context, service_account};

    #[test]
    fn irsa_annotation_passes_and_infers_provider() {
        let mut cp = FakeCluster::default();
        cp.service_accounts = vec![service_account(
            "agent",
            &[(AWS_ROLE_ARN_ANNOTATION, "arn:aws:iam::123456789012:role/agent")],
        )];
        let ctx = context(&cp, agent_pod());
        assert_eq!(ServiceAccountIdentity.run(&ctx).status, Status::Pass);
    }

    #[test]
    fn placeholder_role_fails() {
        let mut cp = FakeCluster::default();
        cp.service_accounts = vec![service_account(
            "agent",
            &[(AWS_ROLE_ARN_ANNOTATION, "arn:aws:iam::<AccountId>:role/<RoleName>")],
        )];
        let ctx = context(&cp, agent_pod());
        let r = ServiceAccountIdentity.run(&ctx);
        assert_eq!(r.status, Status::Fail);
        assert!(r.message.contains("placeholder"));
    }

    #[test]
    fn missing_account_fails() {
        let cp = FakeCluster::default();
        let ctx = context(&cp, agent_pod());
        let r = ServiceAccountIdentity.run(&ctx);
        assert_eq!(r.status, Status::Fail);
        assert!(r.message.contains("does not exist"));
    }

    #[test]
    fn azure_requires_pod_label() {
        let mut cp = FakeCluster::default();
        cp.service_accounts = vec![service_account(
            "agent",
            &[(AZURE_CLIENT_ID_ANNOTATION, "0f3c2a5e-1b2c-4d5e-8f90-123456789abc")],
        )];
        let mut pod = agent_pod();
        let ctx = context(&cp, pod.clone());
        assert_eq!(ServiceAccountIdentity.run(&ctx).status, Status::Fail);

        pod.metadata
            .labels
            .insert(AZURE_USE_LABEL.to_string(), "true".to_string());
        let ctx = context(&cp, pod);
        assert_eq!(ServiceAccountIdentity.run(&ctx).status, Status::Pass);
    }

    #[test]
    fn declared_aws_without_annotation_warns() {
        let mut cp = FakeCluster::default();
        cp.service_accounts = vec![service_account("agent", &[])];
        let mut ctx = context(&cp, agent_pod());
        assert_eq!(ServiceAccountIdentity.run(&ctx).status, Status::Info);
        ctx.settings.provider = Some(Provider::Aws);
        assert_eq!(ServiceAccountIdentity.run(&ctx).status, Status::Warn);
    }
}
