use std::sync::OnceLock;

use regex::Regex;

use crate::classify::{Classify, Gathered, ProbeMeta};
use crate::core::{ProbeResult, Scope};
use crate::kube::VersionInfo;
use crate::probes::Probe;
use crate::probes::cluster::ClusterContext;

const CONTROL_PLANE_VERSION: ProbeMeta =
    ProbeMeta::new("control-plane-version", Scope::Cluster, "control plane version");
const IMAGE_TRACK: ProbeMeta =
    ProbeMeta::new("image-track", Scope::Cluster, "image track").warn_when_unobserved();

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionOutcome {
    Supported { minor: u32, git_version: String },
    EndOfLife { minor: u32, min: u32 },
    NewerThanValidated { minor: u32, max: u32 },
    Unparsable { raw: String },
}

/// Minor version of a server; managed offerings append `+` (EKS "29+").
pub fn parse_minor(info: &VersionInfo) -> Option<u32> {
    let digits: String = info
        .minor
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

pub fn assess_version(info: &VersionInfo, min: u32, max: u32) -> VersionOutcome {
    if info.major.trim() != "1" {
        return VersionOutcome::Unparsable {
            raw: format!("{}.{}", info.major, info.minor),
        };
    }
    match parse_minor(info) {
        None => VersionOutcome::Unparsable {
            raw: format!("{}.{}", info.major, info.minor),
        },
        Some(minor) if minor < min => VersionOutcome::EndOfLife { minor, min },
        Some(minor) if minor > max => VersionOutcome::NewerThanValidated { minor, max },
        Some(minor) => VersionOutcome::Supported {
            minor,
            git_version: info.git_version.clone(),
        },
    }
}

impl Classify for VersionOutcome {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        match self {
            VersionOutcome::Supported { minor, git_version } => {
                meta.pass(format!("Kubernetes 1.{minor} is supported ({git_version})"))
            }
            VersionOutcome::EndOfLife { minor, min } => meta.warn(
                format!("Kubernetes 1.{minor} is older than the oldest supported release 1.{min}"),
                "Upgrade the cluster control plane; end-of-life releases no longer receive fixes.",
            ),
            VersionOutcome::NewerThanValidated { minor, max } => meta.info(format!(
                "Kubernetes 1.{minor} is newer than the newest validated release 1.{max}"
            )),
            VersionOutcome::Unparsable { raw } => meta.warn(
                format!("could not parse the server version {raw:?}"),
                "Check that the context points at a Kubernetes API server.",
            ),
        }
    }
}

pub struct ControlPlaneVersion;

impl<'a> Probe<ClusterContext<'a>> for ControlPlaneVersion {
    fn meta(&self) -> ProbeMeta {
        CONTROL_PLANE_VERSION
    }

    fn run(&self, ctx: &ClusterContext<'a>) -> ProbeResult {
        assess_version(
            &ctx.version,
            ctx.settings.min_supported_minor,
            ctx.settings.max_validated_minor,
        )
        .classify(&CONTROL_PLANE_VERSION)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Digest { image: String },
    Versioned { image: String, tag: String },
    Track { image: String, tag: String },
    Latest { image: String },
    Untagged { image: String },
    NonStandard { image: String, tag: String },
}

fn is_version_tag(tag: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^v?\d+\.\d+(\.\d+)?([-+._][0-9A-Za-z.-]+)?$").expect("valid regex")
    })
    .is_match(tag)
}

pub fn classify_image(image: &str, tracks: &[String]) -> ImageRef {
    let owned = image.to_string();
    if image.contains('@') {
        return ImageRef::Digest { image: owned };
    }
    // The tag separator is the last ':' after the last '/' (registry ports
    // also use ':').
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    let Some((_, tag)) = last_segment.rsplit_once(':') else {
        return ImageRef::Untagged { image: owned };
    };
    let tag = tag.to_string();
    if tag == "latest" {
        ImageRef::Latest { image: owned }
    } else if is_version_tag(&tag) {
        ImageRef::Versioned { image: owned, tag }
    } else if tracks.iter().any(|t| t == &tag) {
        ImageRef::Track { image: owned, tag }
    } else {
        ImageRef::NonStandard { image: owned, tag }
    }
}

impl Classify for ImageRef {
    fn classify(&self, meta: &ProbeMeta) -> ProbeResult {
        let pin = "Pin the agent image to a release version or a supported track tag.";
        match self {
            ImageRef::Digest { image } => meta.pass(format!("image pinned by digest ({image})")),
            ImageRef::Versioned { image, tag } => {
                meta.pass(format!("image pinned to release {tag} ({image})"))
            }
            ImageRef::Track { image, tag } => {
                meta.pass(format!("image follows the {tag} track ({image})"))
            }
            ImageRef::Latest { image } => {
                meta.warn(format!("image uses the mutable latest tag ({image})"), pin)
            }
            ImageRef::Untagged { image } => {
                meta.warn(format!("image has no tag and resolves to latest ({image})"), pin)
            }
            ImageRef::NonStandard { image, tag } => meta.warn(
                format!("image tag {tag} is neither a release nor a known track ({image})"),
                pin,
            ),
        }
    }
}

pub struct ImageTrack;

impl<'a> Probe<ClusterContext<'a>> for ImageTrack {
    fn meta(&self) -> ProbeMeta {
        IMAGE_TRACK
    }

    fn run(&self, ctx: &ClusterContext<'a>) -> ProbeResult {
        match ctx
            .target_container()
            .and_then(|c| c.image.as_deref())
            .filter(|i| !i.trim().is_empty())
        {
            Some(image) => Gathered::Observed(classify_image(image.trim(), &ctx.settings.image_tracks)),
            None => Gathered::Unobserved(format!("container {} declares no image", ctx.container)),
        }
        .classify(&IMAGE_TRACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use crate::probes::cluster::testing::version;

    #[test]
    fn version_window() {
        let s = |minor: &str| {
            assess_version(&version(minor), 29, 32)
                .classify(&CONTROL_PLANE_VERSION)
                .status
        };
        assert_eq!(s("30"), Status::Pass);
        assert_eq!(s("29+"), Status::Pass);
        assert_eq!(s("27"), Status::Warn);
        assert_eq!(s("33"), Status::Info);
        assert_eq!(s("x"), Status::Warn);
    }

    #[test]
    fn image_tags() {
        let tracks = vec!["stable".to_string(), "current".to_string()];
        assert!(matches!(
            classify_image("registry:5000/agent:current", &tracks),
            ImageRef::Track { .. }
        ));
        assert!(matches!(
            classify_image("registry:5000/agent", &tracks),
            ImageRef::Untagged { .. }
        ));
        assert!(matches!(classify_image("agent:v1.92.3", &tracks), ImageRef::Versioned { .. }));
        assert!(matches!(classify_image("agent:latest", &tracks), ImageRef::Latest { .. }));
        assert!(matches!(classify_image("agent@sha256:abc", &tracks), ImageRef::Digest { .. }));
        assert!(matches!(classify_image("agent:dev-build", &tracks), ImageRef::NonStandard { .. }));
    }
}
