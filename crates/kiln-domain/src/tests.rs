#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use crate::conditions::*;
    use crate::selector::*;
    use crate::types::*;

    fn ready(status: ConditionStatus, reason: &str, message: &str) -> Condition {
        Condition::new(ConditionType::Ready, status, reason, message)
    }

    // ── set_condition ─────────────────────────────────────────────────────────

    #[test]
    fn set_condition_appends_and_stamps_transition_time() {
        let mut list = Vec::new();
        let changed = set_condition(&mut list, ready(ConditionStatus::Unknown, "Pending", ""));
        assert!(changed);
        assert_eq!(list.len(), 1);
        assert!(list[0].last_transition_time.is_some());
    }

    #[test]
    fn set_condition_is_idempotent() {
        let mut list = Vec::new();
        set_condition(&mut list, ready(ConditionStatus::False, "Building", "in progress"));
        let changed =
            set_condition(&mut list, ready(ConditionStatus::False, "Building", "in progress"));
        assert!(!changed);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn transition_time_advances_only_on_status_change() {
        let mut list = Vec::new();
        set_condition(&mut list, ready(ConditionStatus::False, "Building", ""));
        let first = list[0].last_transition_time.unwrap();

        // Reason change within the same truth value is not a transition.
        let changed = set_condition(&mut list, ready(ConditionStatus::False, "Pushing", ""));
        assert!(changed);
        assert_eq!(list[0].last_transition_time.unwrap(), first);
        assert_eq!(list[0].reason, "Pushing");

        // A status flip is.
        let mut cond = ready(ConditionStatus::True, "Completed", "done");
        let explicit = Utc::now() + Duration::seconds(5);
        cond.last_transition_time = Some(explicit);
        set_condition(&mut list, cond);
        assert_eq!(list[0].last_transition_time.unwrap(), explicit);
    }

    #[test]
    fn observed_generation_absent_is_distinct_from_zero() {
        let mut list = Vec::new();
        set_condition(&mut list, ready(ConditionStatus::False, "Building", ""));
        let changed = set_condition(
            &mut list,
            ready(ConditionStatus::False, "Building", "").with_observed_generation(0),
        );
        assert!(changed);
        assert_eq!(list[0].observed_generation, Some(0));
    }

    #[test]
    fn at_most_one_condition_per_type() {
        let mut list = Vec::new();
        for reason in ["Pending", "Building", "Pushing", "Completed"] {
            set_condition(&mut list, ready(ConditionStatus::False, reason, ""));
        }
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn condition_for_phase_status_mapping() {
        assert_eq!(
            Condition::for_phase(LifecyclePhase::Pending, "").status,
            ConditionStatus::Unknown
        );
        assert_eq!(
            Condition::for_phase(LifecyclePhase::Completed, "").status,
            ConditionStatus::True
        );
        for phase in [
            LifecyclePhase::Building,
            LifecyclePhase::Converting,
            LifecyclePhase::Pushing,
            LifecyclePhase::Canceling,
            LifecyclePhase::Failed,
        ] {
            assert_eq!(Condition::for_phase(phase, "").status, ConditionStatus::False);
        }
    }

    // ── Lifecycle predicates ──────────────────────────────────────────────────

    #[test]
    fn phase_predicates() {
        assert!(LifecyclePhase::Completed.is_terminal());
        assert!(LifecyclePhase::Failed.is_terminal());
        assert!(!LifecyclePhase::Canceling.is_terminal());

        assert!(LifecyclePhase::Building.is_active());
        assert!(LifecyclePhase::Converting.is_active());
        assert!(LifecyclePhase::Pushing.is_active());
        assert!(LifecyclePhase::Canceling.is_active());
        assert!(!LifecyclePhase::Pending.is_active());

        assert!(LifecyclePhase::Pending.is_requeue_safe());
        assert!(LifecyclePhase::Completed.is_requeue_safe());
        assert!(LifecyclePhase::Failed.is_requeue_safe());
        assert!(!LifecyclePhase::Building.is_requeue_safe());
    }

    #[test]
    fn phase_round_trips_through_reason_string() {
        for phase in [
            LifecyclePhase::Pending,
            LifecyclePhase::Building,
            LifecyclePhase::Converting,
            LifecyclePhase::Pushing,
            LifecyclePhase::Canceling,
            LifecyclePhase::Completed,
            LifecyclePhase::Failed,
        ] {
            assert_eq!(LifecyclePhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(LifecyclePhase::parse("Sleeping"), None);
    }

    // ── Owner refs ────────────────────────────────────────────────────────────

    #[test]
    fn owner_ref_parse_and_display() {
        let owner = OwnerRef::parse("ImageBuild/base-os").unwrap();
        assert_eq!(owner.kind, ResourceKind::ImageBuild);
        assert_eq!(owner.name, "base-os");
        assert_eq!(owner.to_string(), "ImageBuild/base-os");

        assert!(OwnerRef::parse("base-os").is_err());
        assert!(OwnerRef::parse("Widget/base-os").is_err());
        assert!(OwnerRef::parse("ImageBuild/").is_err());
    }

    // ── Name validation ───────────────────────────────────────────────────────

    #[test]
    fn name_validation() {
        assert!(validate_name("base-os-9.4").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name("UpperCase").is_err());
        assert!(validate_name("under_score").is_err());
        assert!(validate_name(&"x".repeat(254)).is_err());
    }

    // ── Selectors ─────────────────────────────────────────────────────────────

    fn export(name: &str, source: ExportSource) -> ImageExport {
        ImageExport {
            metadata: Metadata::new(name, Utc::now()),
            spec: ImageExportSpec {
                source,
                destination_image: "quay.io/acme/out".into(),
                format: ExportFormat::Qcow2,
            },
            status: ResourceStatus::default(),
        }
    }

    #[test]
    fn selector_parses_equality_and_set_forms() {
        let eq = FieldSelector::parse("spec.source.imageBuildRef=base-os").unwrap();
        assert_eq!(eq.image_build_ref_in, Some(vec!["base-os".to_string()]));

        let set = FieldSelector::parse("spec.source.imageBuildRef in (a, b)").unwrap();
        assert_eq!(set.image_build_ref_in, Some(vec!["a".to_string(), "b".to_string()]));

        assert!(FieldSelector::parse("status.phase=Pending").is_err());
        assert!(FieldSelector::parse("spec.source.imageBuildRef=").is_err());
        assert!(FieldSelector::parse("spec.source.imageBuildRef in ()").is_err());
    }

    #[test]
    fn selector_matches_export_source_ref() {
        let sel = FieldSelector::image_build_ref_eq("base-os");
        let gated = export(
            "e1",
            ExportSource::ImageBuildRef { image_build_ref: "base-os".into() },
        );
        let direct = export("e2", ExportSource::Image { image: "quay.io/acme/base".into() });
        assert!(sel.matches_export(&gated));
        assert!(!sel.matches_export(&direct));
    }

    #[test]
    fn selector_phase_and_liveness_predicates() {
        let now = Utc::now();
        let mut ex = export(
            "e1",
            ExportSource::ImageBuildRef { image_build_ref: "base-os".into() },
        );
        set_condition(
            &mut ex.status.conditions,
            Condition::for_phase(LifecyclePhase::Converting, "converting"),
        );
        ex.status.last_seen = Some(now - Duration::minutes(10));

        let stale = FieldSelector::default()
            .with_phase_in(vec![LifecyclePhase::Converting, LifecyclePhase::Pushing])
            .with_last_seen_before(now - Duration::minutes(5));
        assert!(stale.matches_export(&ex));

        // A fresh heartbeat drops it out of the stale set.
        ex.status.last_seen = Some(now);
        assert!(!stale.matches_export(&ex));

        // Pending resources have no heartbeat; they never match.
        let pending = export(
            "e2",
            ExportSource::ImageBuildRef { image_build_ref: "base-os".into() },
        );
        assert!(!stale.matches_export(&pending));
    }

    // ── Wire model ────────────────────────────────────────────────────────────

    #[test]
    fn export_source_serde_forms() {
        let gated: ExportSource =
            serde_json::from_value(json!({ "imageBuildRef": "base-os" })).unwrap();
        assert_eq!(gated.image_build_ref(), Some("base-os"));

        let direct: ExportSource =
            serde_json::from_value(json!({ "image": "quay.io/acme/base:9" })).unwrap();
        assert_eq!(direct.image_build_ref(), None);
    }

    #[test]
    fn resource_version_is_an_opaque_string_on_the_wire() {
        let meta = Metadata::new("b1", Utc::now());
        let v = serde_json::to_value(&meta).unwrap();
        assert_eq!(v["resourceVersion"], json!("1"));
        let back: Metadata = serde_json::from_value(v).unwrap();
        assert_eq!(back.resource_version, ResourceVersion(1));
    }

    #[test]
    fn build_spec_validation() {
        let spec = ImageBuildSpec {
            source_image: String::new(),
            destination_image: "quay.io/acme/os".into(),
            binding: BindingMode::Late,
            user_config: None,
        };
        assert!(spec.validate().is_err());
    }
}
