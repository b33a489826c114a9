use crate::core::store::types::AgentRole;
use crate::core::swarm::agent::role_system_prompt;
use crate::core::swarm::dispatch::branch_name;
use crate::core::swarm::project::assign_roles;

#[test]
fn a_lone_agent_is_general() {
    assert_eq!(assign_roles(1), vec![AgentRole::General]);
}

#[test]
fn specialists_appear_as_thresholds_are_crossed() {
    assert_eq!(assign_roles(2), vec![AgentRole::General, AgentRole::Qa]);

    let four = assign_roles(4);
    assert_eq!(four.len(), 4);
    assert_eq!(
        four.iter().filter(|r| **r == AgentRole::General).count(),
        2
    );
    assert!(four.contains(&AgentRole::Qa));
    assert!(four.contains(&AgentRole::Documentation));
    assert!(!four.contains(&AgentRole::CodeQuality));

    let six = assign_roles(6);
    assert_eq!(six.len(), 6);
    assert!(six.contains(&AgentRole::Qa));
    assert!(six.contains(&AgentRole::Documentation));
    assert!(six.contains(&AgentRole::CodeQuality));
}

#[test]
fn generals_stay_the_majority_at_scale() {
    for count in 6..12 {
        let roles = assign_roles(count);
        assert_eq!(roles.len(), count);
        let generals = roles.iter().filter(|r| **r == AgentRole::General).count();
        assert_eq!(generals, count - 3);
        assert!(generals > count / 2 || count == 6);
    }
}

#[test]
fn every_role_has_a_distinct_system_prompt() {
    let prompts = [
        role_system_prompt(AgentRole::General),
        role_system_prompt(AgentRole::Qa),
        role_system_prompt(AgentRole::Documentation),
        role_system_prompt(AgentRole::CodeQuality),
        role_system_prompt(AgentRole::Architecture),
    ];
    for (i, a) in prompts.iter().enumerate() {
        assert!(!a.is_empty());
        for b in prompts.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn branch_names_are_sanitized_and_capped() {
    assert_eq!(
        branch_name("0a1b2c3d-rest-ignored", "Add User Login!"),
        "swarm/0a1b2c3d-add-user-login"
    );
    assert_eq!(
        branch_name("0a1b2c3d", "  --weird__  punctuation?!  "),
        "swarm/0a1b2c3d-weird-punctuation"
    );
    assert_eq!(branch_name("0a1b2c3d", "!!!"), "swarm/0a1b2c3d");

    let long = branch_name("0a1b2c3d", &"very long title ".repeat(20));
    assert!(long.len() <= 60);
    assert!(!long.ends_with('-'));
    assert!(long.starts_with("swarm/0a1b2c3d-very-long"));
}
