use crate::classify::{Classify, Gathered, ProbeMeta};
use crate::core::{ProbeResult, Scope, Status};
use crate::platform::CommandError;
use crate::probes::Probe;
use crate::probes::workload::WorkloadContext;

const DNS_RESOLUTION: ProbeMeta = ProbeMeta::new("dns-resolution", Scope::Workload, "dns resolution");
const HTTPS_EGRESS: ProbeMeta = ProbeMeta::new("https-egress", Scope::Workload, "https egress");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Resolved { address: String },
    NotFound,
    Error { exit_code: i32 },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsOutcome {
    pub lookups: Vec<(String, Lookup)>,
}

fn lookup(ctx: &WorkloadContext<'_>, host: &str) -> Result<Lookup, CommandError> {
    match ctx.runner.run("getent", &["hosts", host], ctx.timeout) {
        Ok(out) if out.success() => {
            let address = out
                .stdout
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            Ok(Lookup::Resolved { address })
        }
        // getent: 2 = key not found
        Ok(out) if out.exit_code == 2 => Ok(Lookup::NotFound),
        Ok(out) => Ok(Lookup::Error {
            exit_code: out.exit_code,
        }),
        Err(CommandError::Timeout { .. }) => Ok(Lookup::TimedOut),
        Err(err) => Err(err),
    }
}

impl Classify for DnsOutcome {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        if self.lookups.is_empty() {
            return meta.info("no hosts to resolve (set [network] dns_hosts or CLOUD_PROVIDER)");
        }
        let failed: Vec<String> = self
            .lookups
            .iter()
            .filter_map(|(host, lookup)| match lookup {
                Lookup::Resolved { .. } => None,
                Lookup::NotFound => Some(format!("{host} (not found)")),
                Lookup::Error { exit_code } => Some(format!("{host} (getent exit {exit_code})")),
                Lookup::TimedOut => Some(format!("{host} (timed out)")),
            })
            .collect();
        let detail = self
            .lookups
            .iter()
            .map(|(host, lookup)| match lookup {
                Lookup::Resolved { address } => format!("{host} -> {address}"),
                other => format!("{host}: {other:?}"),
            })
            .collect::<Vec<_>>()
            .join("\n");
        if failed.is_empty() {
            meta.pass(format!("resolved {} host(s)", self.lookups.len()))
                .with_detail(detail)
        } else {
            meta.fail(
                format!("could not resolve {}", failed.join(", ")),
                "Check that egress to kube-dns on port 53 is allowed and that the cluster DNS can reach upstream resolvers.",
            )
            .with_detail(detail)
        }
    }
}

pub struct DnsResolution;

impl<'a> Probe<WorkloadContext<'a>> for DnsResolution {
    fn meta(&self) -> ProbeMeta {
        DNS_RESOLUTION
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        let mut lookups = Vec::new();
        for host in ctx.dns_hosts() {
            match lookup(ctx, &host) {
                Ok(result) => lookups.push((host, result)),
                Err(CommandError::NotFound { program }) => {
                    return Gathered::<DnsOutcome>::ToolUnavailable(program).classify(&DNS_RESOLUTION);
                }
                Err(err) => {
                    return Gathered::<DnsOutcome>::Unobserved(err.to_string())
                        .classify(&DNS_RESOLUTION);
                }
            }
        }
        DnsOutcome { lookups }.classify(&DNS_RESOLUTION)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reach {
    /// Any HTTP response, whatever its status, proves the path is open.
    Responded { http_code: String },
    ResolveFailed,
    ConnectFailed,
    TimedOut,
    TlsFailed { curl_exit: i32 },
    Other { curl_exit: i32 },
}

impl Reach {
    /// Maps curl exit codes onto reachability classes.
    pub fn from_curl(exit_code: i32, stdout: &str) -> Reach {
        match exit_code {
            0 => Reach::Responded {
                http_code: stdout.trim().to_string(),
            },
            6 => Reach::ResolveFailed,
            7 => Reach::ConnectFailed,
            28 => Reach::TimedOut,
            35 | 51 | 58 | 60 => Reach::TlsFailed {
                curl_exit: exit_code,
            },
            other => Reach::Other { curl_exit: other },
        }
    }

    fn status(&self) -> Status {
        match self {
            Reach::Responded { .. } => Status::Pass,
            Reach::ResolveFailed | Reach::ConnectFailed | Reach::TimedOut => Status::Fail,
            Reach::TlsFailed { .. } | Reach::Other { .. } => Status::Warn,
        }
    }

    fn describe(&self) -> String {
        match self {
            Reach::Responded { http_code } => format!("HTTP {http_code}"),
            Reach::ResolveFailed => "name resolution failed".to_string(),
            Reach::ConnectFailed => "connection refused or blocked".to_string(),
            Reach::TimedOut => "timed out".to_string(),
            Reach::TlsFailed { curl_exit } => format!("TLS handshake failed (curl exit {curl_exit})"),
            Reach::Other { curl_exit } => format!("curl exit {curl_exit}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressOutcome {
    pub endpoints: Vec<(String, Reach)>,
}

impl Classify for EgressOutcome {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        if self.endpoints.is_empty() {
            return meta.info(
                "no endpoints to check (set [network] https_endpoints or CLOUD_PROVIDER)",
            );
        }
        let worst = self
            .endpoints
            .iter()
            .map(|(_, reach)| reach.status())
            .max()
            .unwrap_or(Status::Pass);
        let detail = self
            .endpoints
            .iter()
            .map(|(url, reach)| format!("{url}: {}", reach.describe()))
            .collect::<Vec<_>>()
            .join("\n");
        let broken: Vec<String> = self
            .endpoints
            .iter()
            .filter(|(_, reach)| reach.status() == worst)
            .map(|(url, reach)| format!("{url} ({})", reach.describe()))
            .collect();
        match worst {
            Status::Fail => meta
                .fail(
                    format!("cannot reach {}", broken.join(", ")),
                    "Allow egress on port 443 to these endpoints in the NetworkPolicy, security group and any proxy allowlist.",
                )
                .with_detail(detail),
            Status::Warn => meta
                .warn(
                    format!("reached but could not verify {}", broken.join(", ")),
                    "A TLS-intercepting proxy or missing CA bundle is likely; add the proxy CA to the container trust store.",
                )
                .with_detail(detail),
            Status::Pass | Status::Info => meta
                .pass(format!("reached {} endpoint(s) over https", self.endpoints.len()))
                .with_detail(detail),
        }
    }
}

pub struct HttpsEgress;

impl<'a> Probe<WorkloadContext<'a>> for HttpsEgress {
    fn meta(&self) -> ProbeMeta {
        HTTPS_EGRESS
    }

    fn run(&self, ctx: &WorkloadContext<'a>) -> ProbeResult {
        let max_time = ctx.timeout.as_secs().max(1).to_string();
        let mut endpoints = Vec::new();
        for url in ctx.https_endpoints() {
            let args = [
                "--silent",
                "--output",
                "/dev/null",
                "--max-time",
                max_time.as_str(),
                "--write-out",
                "%{http_code}",
                url.as_str(),
            ];
            let reach = match ctx.runner.run("curl", &args, ctx.timeout) {
                Ok(out) => Reach::from_curl(out.exit_code, &out.stdout),
                Err(CommandError::Timeout { .. }) => Reach::TimedOut,
                Err(CommandError::NotFound { program }) => {
                    return Gathered::<EgressOutcome>::ToolUnavailable(program)
                        .classify(&HTTPS_EGRESS);
                }
                Err(err) => {
                    return Gathered::<EgressOutcome>::Unobserved(err.to_string())
                        .classify(&HTTPS_EGRESS);
                }
            };
            tracing::debug!(%url, ?reach, "egress check");
            endpoints.push((url, reach));
        }
        EgressOutcome { endpoints }.classify(&HTTPS_EGRESS)
    }
}
