use rookery_types::{
    AgentCategory, AgentTypeSpec, CapabilityDescriptor, CoreError, TaskSpec,
    MAX_ID_LEN, MAX_TASK_DESCRIPTION_LEN,
};

#[test]
fn test_task_spec_validation() {
    // Valid task spec
    let valid = TaskSpec::new("t1", "Valid task description").unwrap();
    assert_eq!(valid.description, "Valid task description");
    assert!(valid.validate().is_ok());

    // Empty description should fail
    assert!(TaskSpec::new("t1", "").is_err());
    assert!(TaskSpec::new("t1", "   ").is_err());

    // Empty id should fail
    assert!(TaskSpec::new("", "described").is_err());

    // Too long description should fail
    let long_desc = "x".repeat(MAX_TASK_DESCRIPTION_LEN + 1);
    assert!(TaskSpec::new("t1", long_desc).is_err());

    // Boundary case - exactly at limit should work
    let boundary_desc = "x".repeat(MAX_TASK_DESCRIPTION_LEN);
    assert!(TaskSpec::new("t1", boundary_desc).is_ok());

    // Too long id should fail
    let long_id = "x".repeat(MAX_ID_LEN + 1);
    assert!(TaskSpec::new(long_id, "described").is_err());
}

#[test]
fn test_self_dependency_rejected() {
    let spec = TaskSpec::new("t1", "loops back")
        .unwrap()
        .with_dependencies(vec!["t1".to_string()]);
    match spec.validate() {
        Err(CoreError::Validation(msg)) => assert!(msg.contains("depend on itself")),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_agent_type_validation() {
    let valid = AgentTypeSpec::new("research", "Research agents", AgentCategory::Research)
        .unwrap()
        .with_capability(CapabilityDescriptor::new("web_research", "Web research"));
    assert!(valid.validate().is_ok());
    assert!(valid.declares("web_research"));
    assert!(!valid.declares("code_review"));

    // Empty id/name should fail
    assert!(AgentTypeSpec::new("", "name", AgentCategory::Custom).is_err());
    assert!(AgentTypeSpec::new("id", "  ", AgentCategory::Custom).is_err());

    // Duplicate capability ids should fail
    let dup = AgentTypeSpec::new("research", "Research agents", AgentCategory::Research)
        .unwrap()
        .with_capability(CapabilityDescriptor::new("web_research", "Web research"))
        .with_capability(CapabilityDescriptor::new("web_research", "Again"));
    assert!(dup.validate().is_err());
}

#[test]
fn test_task_spec_serde_round_trip() {
    let spec = TaskSpec::new("t1", "round trip")
        .unwrap()
        .with_priority(5)
        .with_capability("web_research")
        .with_dependencies(vec!["t0".to_string()]);

    let json = serde_json::to_string(&spec).unwrap();
    let back: TaskSpec = serde_json::from_str(&json).unwrap();
    assert_eq!(spec, back);
}
