use std::collections::BTreeMap;

use kiln_domain::{ExportSource, ImageBuild, ImageExport};

fn phase_of_build(build: &ImageBuild) -> &'static str {
    build.phase().map(|p| p.as_str()).unwrap_or("Unknown")
}

fn phase_of_export(export: &ImageExport) -> &'static str {
    export.phase().map(|p| p.as_str()).unwrap_or("Unknown")
}

/// Render image builds as a fixed-width table.
pub fn render_builds(builds: &[ImageBuild]) -> String {
    if builds.is_empty() {
        return "No image builds.\n".to_string();
    }
    let mut out = format!("{:<30} {:<12} {:<4} {}\n", "NAME", "PHASE", "GEN", "DESTINATION");
    for build in builds {
        out.push_str(&format!(
            "{:<30} {:<12} {:<4} {}\n",
            build.name(),
            phase_of_build(build),
            build.metadata.generation,
            build.spec.destination_image,
        ));
    }
    out
}

pub fn render_exports(exports: &[ImageExport]) -> String {
    if exports.is_empty() {
        return "No image exports.\n".to_string();
    }
    let mut out = format!(
        "{:<30} {:<12} {:<8} {}\n",
        "NAME", "PHASE", "FORMAT", "SOURCE"
    );
    for export in exports {
        let source = match &export.spec.source {
            ExportSource::ImageBuildRef { image_build_ref } => {
                format!("build/{image_build_ref}")
            }
            ExportSource::Image { image } => image.clone(),
        };
        out.push_str(&format!(
            "{:<30} {:<12} {:<8} {}\n",
            export.name(),
            phase_of_export(export),
            export.spec.format.to_string(),
            source,
        ));
    }
    out
}

/// Phase counts across both kinds.
pub fn render_status(builds: &[ImageBuild], exports: &[ImageExport]) -> String {
    let mut counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for build in builds {
        *counts.entry(("ImageBuild", phase_of_build(build))).or_default() += 1;
    }
    for export in exports {
        *counts.entry(("ImageExport", phase_of_export(export))).or_default() += 1;
    }
    if counts.is_empty() {
        return "No resources.\n".to_string();
    }
    let mut out = format!("{:<14} {:<12} {}\n", "KIND", "PHASE", "COUNT");
    for ((kind, phase), count) in counts {
        out.push_str(&format!("{kind:<14} {phase:<12} {count}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kiln_domain::{
        set_condition, BindingMode, Condition, ExportFormat, ImageBuildSpec, ImageExportSpec,
        LifecyclePhase, Metadata, ResourceStatus,
    };

    fn build(name: &str, phase: LifecyclePhase) -> ImageBuild {
        let mut status = ResourceStatus::default();
        set_condition(&mut status.conditions, Condition::for_phase(phase, ""));
        ImageBuild {
            metadata: Metadata::new(name, Utc::now()),
            spec: ImageBuildSpec {
                source_image: "quay.io/acme/base".into(),
                destination_image: "quay.io/acme/os".into(),
                binding: BindingMode::Late,
                user_config: None,
            },
            status,
            exports: None,
        }
    }

    #[test]
    fn renders_build_rows() {
        let rendered = render_builds(&[build("b1", LifecyclePhase::Building)]);
        assert!(rendered.contains("b1"));
        assert!(rendered.contains("Building"));
    }

    #[test]
    fn renders_empty_lists() {
        assert_eq!(render_builds(&[]), "No image builds.\n");
        assert_eq!(render_exports(&[]), "No image exports.\n");
    }

    #[test]
    fn status_counts_by_kind_and_phase() {
        let builds = vec![
            build("b1", LifecyclePhase::Completed),
            build("b2", LifecyclePhase::Completed),
        ];
        let mut export_status = ResourceStatus::default();
        set_condition(
            &mut export_status.conditions,
            Condition::for_phase(LifecyclePhase::Pending, ""),
        );
        let exports: Vec<ImageExport> = vec![ImageExport {
            metadata: Metadata::new("e1", Utc::now()),
            spec: ImageExportSpec {
                source: kiln_domain::ExportSource::Image { image: "quay.io/acme/os".into() },
                destination_image: "quay.io/acme/os-disk".into(),
                format: ExportFormat::Vmdk,
            },
            status: export_status,
        }];
        let rendered = render_status(&builds, &exports);
        assert!(rendered.contains("ImageBuild     Completed    2"));
        assert!(rendered.contains("ImageExport    Pending      1"));
    }
}
